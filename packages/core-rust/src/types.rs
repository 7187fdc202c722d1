use serde::{Deserialize, Serialize};

/// Element kind of a [`ConfigValue::List`].
///
/// Lists only ever hold scalars, so this is the set of scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElemKind {
    String,
    Int,
    Float,
    Bool,
}

impl ElemKind {
    /// Short lowercase name used in logs and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }
}

impl std::fmt::Display for ElemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Dynamically typed configuration value.
///
/// Common currency between the configuration store and bus clients: values
/// read from the store are marshaled into wire arguments, and wire arguments
/// received from clients are decoded into this type before being written.
///
/// A `List` is homogeneous: every element is a scalar whose kind equals the
/// declared [`ElemKind`]. Empty lists are legal and keep their declared kind,
/// which is what lets an empty list still be sent with the right signature.
/// The invariant is upheld by the typed constructors (`string_list` and
/// friends); lists built by hand or deserialized are checked when marshaled.
///
/// Serializes with an explicit `type` tag so that integer and float values
/// survive a trip through JSON seed files unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    /// UTF-8 string.
    String(String),
    /// Signed 32-bit integer.
    Int(i32),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Homogeneous list of scalars of the given kind.
    List(ElemKind, Vec<ConfigValue>),
}

impl ConfigValue {
    /// Builds a string list.
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(
            ElemKind::String,
            items.into_iter().map(|s| Self::String(s.into())).collect(),
        )
    }

    /// Builds an integer list.
    pub fn int_list(items: impl IntoIterator<Item = i32>) -> Self {
        Self::List(ElemKind::Int, items.into_iter().map(Self::Int).collect())
    }

    /// Builds a float list.
    pub fn float_list(items: impl IntoIterator<Item = f64>) -> Self {
        Self::List(ElemKind::Float, items.into_iter().map(Self::Float).collect())
    }

    /// Builds a boolean list.
    pub fn bool_list(items: impl IntoIterator<Item = bool>) -> Self {
        Self::List(ElemKind::Bool, items.into_iter().map(Self::Bool).collect())
    }

    /// Scalar kind of this value, or `None` for lists.
    #[must_use]
    pub fn scalar_kind(&self) -> Option<ElemKind> {
        match self {
            Self::String(_) => Some(ElemKind::String),
            Self::Int(_) => Some(ElemKind::Int),
            Self::Float(_) => Some(ElemKind::Float),
            Self::Bool(_) => Some(ElemKind::Bool),
            Self::List(..) => None,
        }
    }

    /// Short lowercase name of the value's kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::List(..) => "list",
            scalar => scalar.scalar_kind().map_or("list", ElemKind::name),
        }
    }

    /// Whether two values have the same shape: same scalar kind, or lists
    /// with the same element kind.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a, _), Self::List(b, _)) => a == b,
            (a, b) => a.scalar_kind().is_some() && a.scalar_kind() == b.scalar_kind(),
        }
    }

    /// Returns `true` unless this is a list holding an element that is not a
    /// scalar of the declared kind.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::List(kind, items) => items.iter().all(|item| item.scalar_kind() == Some(*kind)),
            _ => true,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of a list value, or `None` for scalars.
    #[must_use]
    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(_, items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for ConfigValue {
    fn from(n: i32) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for ConfigValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_list_constructors_are_homogeneous() {
        let lists = [
            ConfigValue::string_list(["a", "b"]),
            ConfigValue::int_list([1, 2, 3]),
            ConfigValue::float_list([0.5]),
            ConfigValue::bool_list([true, false]),
        ];
        for list in &lists {
            assert!(list.is_well_formed(), "{list:?}");
            assert_eq!(list.kind_name(), "list");
        }
    }

    #[test]
    fn empty_list_keeps_declared_kind() {
        let empty = ConfigValue::int_list([]);
        assert_eq!(empty, ConfigValue::List(ElemKind::Int, vec![]));
        assert!(empty.is_well_formed());
        assert!(empty.same_kind(&ConfigValue::int_list([7])));
        assert!(!empty.same_kind(&ConfigValue::bool_list([])));
    }

    #[test]
    fn mixed_list_is_not_well_formed() {
        let mixed = ConfigValue::List(
            ElemKind::Int,
            vec![ConfigValue::Int(1), ConfigValue::Bool(true)],
        );
        assert!(!mixed.is_well_formed());

        let nested = ConfigValue::List(ElemKind::Int, vec![ConfigValue::int_list([1])]);
        assert!(!nested.is_well_formed());
    }

    #[test]
    fn scalar_kinds_and_accessors() {
        assert_eq!(ConfigValue::from("x").as_str(), Some("x"));
        assert_eq!(ConfigValue::from(5).as_int(), Some(5));
        assert_eq!(ConfigValue::from(1.5).as_float(), Some(1.5));
        assert_eq!(ConfigValue::from(true).as_bool(), Some(true));
        assert_eq!(ConfigValue::Int(1).kind_name(), "int");
        assert!(ConfigValue::Int(1).same_kind(&ConfigValue::Int(9)));
        assert!(!ConfigValue::Int(1).same_kind(&ConfigValue::Float(1.0)));
        assert!(ConfigValue::Int(1).as_list().is_none());
    }

    #[test]
    fn serde_keeps_int_and_float_apart() {
        let values = vec![
            ConfigValue::Int(3),
            ConfigValue::Float(3.0),
            ConfigValue::string_list(["on"]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<ConfigValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
