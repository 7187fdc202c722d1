//! Fine-grained signal filter rules.
//!
//! A rule is a comma-separated list of `key=value` clauses, for example
//! `arg0='com.example.Service', path=/com/example`. Values may be wrapped in
//! single quotes; whitespace around `=` and around commas is ignored. All
//! clauses must match (conjunction).
//!
//! Supported keys:
//!
//! - `argN` compares the N-th positional argument, which must be a string.
//! - `path` compares the message's object path.
//!
//! Any other key yields no value and therefore never matches.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::message::{Arg, Message};

/// Field a clause compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKey {
    /// Positional string argument.
    Arg(usize),
    /// Object path of the message.
    Path,
    /// Anything else; kept so the rule still round-trips for diagnostics.
    Unsupported(String),
}

impl RuleKey {
    fn parse(key: &str) -> Self {
        if key == "path" {
            return Self::Path;
        }
        let index = key
            .strip_prefix("arg")
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<usize>().ok());
        match index {
            Some(index) => Self::Arg(index),
            None => Self::Unsupported(key.to_string()),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arg(index) => write!(f, "arg{index}"),
            Self::Path => f.write_str("path"),
            Self::Unsupported(key) => f.write_str(key),
        }
    }
}

/// One `key=value` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub key: RuleKey,
    pub value: String,
}

impl Clause {
    fn field<'m>(&self, msg: &'m Message) -> Option<&'m str> {
        match &self.key {
            RuleKey::Arg(index) => msg.arg(*index).and_then(Arg::as_str),
            RuleKey::Path => msg.path(),
            RuleKey::Unsupported(_) => None,
        }
    }

    #[must_use]
    pub fn matches(&self, msg: &Message) -> bool {
        self.field(msg) == Some(self.value.as_str())
    }
}

/// Errors from parsing rule text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("clause {0:?} has no '='")]
    MissingEquals(String),
    #[error("unterminated quote in value for {0:?}")]
    UnterminatedQuote(String),
    #[error("unexpected {found:?} after quoted value for {key:?}")]
    TrailingText { key: String, found: String },
}

/// A parsed filter rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    clauses: Vec<Clause>,
}

impl Rule {
    /// Parses rule text.
    ///
    /// Blank text parses to an empty rule, which matches everything.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleError`] when a clause lacks `=`, a quoted value is not
    /// closed, or text follows a closing quote before the next comma.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let mut clauses = Vec::new();
        let mut rest = text.trim_start();

        while !rest.is_empty() {
            let Some((key, after_eq)) = rest.split_once('=') else {
                return Err(RuleError::MissingEquals(rest.trim().to_string()));
            };
            let key = key.trim();
            let after_eq = after_eq.trim_start();

            let (value, remainder) = if let Some(quoted) = after_eq.strip_prefix('\'') {
                let Some((value, tail)) = quoted.split_once('\'') else {
                    return Err(RuleError::UnterminatedQuote(key.to_string()));
                };
                let tail = tail.trim_start();
                match tail.strip_prefix(',') {
                    Some(next) => (value, next),
                    None if tail.is_empty() => (value, tail),
                    None => {
                        return Err(RuleError::TrailingText {
                            key: key.to_string(),
                            found: tail.to_string(),
                        })
                    }
                }
            } else {
                match after_eq.split_once(',') {
                    Some((value, next)) => (value.trim_end(), next),
                    None => (after_eq.trim_end(), ""),
                }
            };

            clauses.push(Clause {
                key: RuleKey::parse(key),
                value: value.to_string(),
            });
            rest = remainder.trim_start();
        }

        Ok(Self { clauses })
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns `true` when every clause matches `msg`.
    #[must_use]
    pub fn matches(&self, msg: &Message) -> bool {
        self.clauses.iter().all(|clause| clause.matches(msg))
    }
}

impl FromStr for Rule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Evaluates optional rule text against a message.
///
/// `None` always matches. Text that fails to parse never matches.
#[must_use]
pub fn matches(msg: &Message, rule: Option<&str>) -> bool {
    match rule {
        None => true,
        Some(text) => Rule::parse(text).is_ok_and(|rule| rule.matches(msg)),
    }
}

/// Bus-level match expression for a signal subscription:
/// `type='signal'[, interface='I'], member='M'[, <rule>]`.
#[must_use]
pub fn signal_match_expression(interface: Option<&str>, member: &str, rule: Option<&str>) -> String {
    let mut expr = String::from("type='signal'");
    if let Some(iface) = interface {
        expr.push_str(&format!(", interface='{iface}'"));
    }
    expr.push_str(&format!(", member='{member}'"));
    if let Some(rule) = rule.map(str::trim).filter(|r| !r.is_empty()) {
        expr.push_str(", ");
        expr.push_str(rule);
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names;

    fn owner_changed(name: &str, old: &str, new: &str) -> Message {
        Message::name_owner_changed(name, old, new)
    }

    #[test]
    fn no_rule_always_matches() {
        assert!(matches(&owner_changed("a", "b", "c"), None));
        assert!(matches(&owner_changed("a", "b", "c"), Some("   ")));
    }

    #[test]
    fn arg1_matches_exact_string_only() {
        let rule = Some("arg1='svc'");
        assert!(matches(&owner_changed("x", "svc", ""), rule));
        assert!(!matches(&owner_changed("x", "svc2", ""), rule));
        assert!(!matches(&owner_changed("x", "sv", ""), rule));
        assert!(!matches(&owner_changed("svc", "other", ""), rule));
    }

    #[test]
    fn arg_must_exist_and_be_string() {
        let short = Message::signal("/", "com.example", "Ping").with_arg(Arg::string("only"));
        assert!(!matches(&short, Some("arg1='only'")));

        let typed = Message::signal("/", "com.example", "Ping")
            .with_arg(Arg::string("a"))
            .with_arg(Arg::Int32(5));
        assert!(!matches(&typed, Some("arg1='5'")));

        let path = Message::signal("/", "com.example", "Ping")
            .with_arg(Arg::string("a"))
            .with_arg(Arg::ObjectPath("/p".into()));
        assert!(!matches(&path, Some("arg1='/p'")));
    }

    #[test]
    fn path_clause_compares_object_path() {
        let msg = owner_changed("a", "b", "c");
        assert!(matches(&msg, Some(&format!("path='{}'", names::DBUS_PATH))));
        assert!(!matches(&msg, Some("path='/other'")));
    }

    #[test]
    fn clauses_are_conjunctive() {
        let msg = owner_changed("name", "old", "new");
        assert!(matches(&msg, Some("arg0='name', arg2='new'")));
        assert!(!matches(&msg, Some("arg0='name', arg2='old'")));
        assert!(!matches(&msg, Some("arg0='nope', arg2='new'")));
    }

    #[test]
    fn whitespace_and_unquoted_values() {
        let msg = owner_changed("name", "old", "new");
        assert!(matches(&msg, Some("  arg0 = name ,arg1=  'old'  ,  arg2=new")));
        let rule = Rule::parse("arg0 = name ,arg1='old'").unwrap();
        assert_eq!(
            rule.clauses(),
            &[
                Clause {
                    key: RuleKey::Arg(0),
                    value: "name".into()
                },
                Clause {
                    key: RuleKey::Arg(1),
                    value: "old".into()
                },
            ]
        );
    }

    #[test]
    fn quoted_value_may_contain_commas() {
        let msg = Message::signal("/", "com.example", "Ping").with_arg(Arg::string("a,b"));
        assert!(matches(&msg, Some("arg0='a,b'")));
    }

    #[test]
    fn unsupported_keys_never_match() {
        let msg = owner_changed("name", "old", "new");
        assert!(!matches(&msg, Some("sender='name'")));
        assert!(!matches(&msg, Some("argx='name'")));
        assert_eq!(
            Rule::parse("member=Foo").unwrap().clauses()[0].key,
            RuleKey::Unsupported("member".into())
        );
    }

    #[test]
    fn arg_index_must_be_plain_digits() {
        let msg = owner_changed("name", "old", "new");
        assert!(!matches(&msg, Some("arg+1='old'")));
        assert!(!matches(&msg, Some("arg='name'")));
        assert_eq!(
            Rule::parse("arg+1='old'").unwrap().clauses()[0].key,
            RuleKey::Unsupported("arg+1".into())
        );
        assert_eq!(
            Rule::parse("arg01='old'").unwrap().clauses()[0].key,
            RuleKey::Arg(1)
        );
    }

    #[test]
    fn malformed_rules_fail_to_parse_and_never_match() {
        let msg = owner_changed("name", "old", "new");
        assert!(matches!(Rule::parse("arg0"), Err(RuleError::MissingEquals(_))));
        assert!(matches!(
            Rule::parse("arg0='name"),
            Err(RuleError::UnterminatedQuote(_))
        ));
        assert!(matches!(
            "arg0='name' x".parse::<Rule>(),
            Err(RuleError::TrailingText { .. })
        ));
        assert!(!matches(&msg, Some("arg0='name")));
    }

    #[test]
    fn match_expression_layout() {
        assert_eq!(
            signal_match_expression(Some("org.freedesktop.DBus"), "NameOwnerChanged", Some("arg1='svc'")),
            "type='signal', interface='org.freedesktop.DBus', member='NameOwnerChanged', arg1='svc'"
        );
        assert_eq!(
            signal_match_expression(None, "Changed", None),
            "type='signal', member='Changed'"
        );
    }
}
