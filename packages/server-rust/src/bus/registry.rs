//! Registry of message handlers.
//!
//! Entries live in a stable-index arena: new entries are appended and the
//! dispatcher walks from the end, so the most recently registered handler is
//! consulted first. Unregistering leaves a tombstone in place. While any
//! dispatch walk is in progress tombstones are kept, which keeps every index
//! a walk may still visit valid; the arena is compacted once the last walk
//! ends.

use std::fmt;
use std::rc::Rc;

use mcebus_core::rules::{self, Rule, RuleError};
use mcebus_core::{Message, MessageKind};
use tracing::{debug, error, warn};

use super::context::BusContext;
use super::dispatch::HandlerResult;
use super::traits::{Bus, BusError};

/// Handler callback. Receives the context so it can send, register or
/// unregister while running.
pub type Callback = Rc<dyn Fn(&mut BusContext, &Message) -> HandlerResult>;

/// Opaque registration token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Errors from registering a handler.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cannot register a handler for {0} messages")]
    InvalidHandlerKind(MessageKind),
    #[error("failed to add match `{expression}`")]
    Subscribe {
        expression: String,
        #[source]
        source: BusError,
    },
}

// ---------------------------------------------------------------------------
// HandlerEntry
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SignalFilter {
    Any,
    Rule(Rule),
    Malformed,
}

/// A registered handler. Immutable once registered.
pub struct HandlerEntry {
    id: HandlerId,
    kind: MessageKind,
    interface: Option<String>,
    member: String,
    rule: Option<String>,
    filter: SignalFilter,
    callback: Callback,
}

impl HandlerEntry {
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Member name, or the error name for error handlers.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    pub(crate) fn callback(&self) -> Callback {
        Rc::clone(&self.callback)
    }

    /// Whether this entry wants `msg`.
    #[must_use]
    pub fn matches(&self, msg: &Message) -> bool {
        let interface = self.interface.as_deref();
        match self.kind {
            MessageKind::MethodCall => msg.is_method_call(interface, &self.member),
            MessageKind::Error => msg.is_error(&self.member),
            MessageKind::Signal => {
                msg.is_signal(interface, &self.member)
                    && match &self.filter {
                        SignalFilter::Any => true,
                        SignalFilter::Rule(rule) => rule.matches(msg),
                        SignalFilter::Malformed => false,
                    }
            }
            MessageKind::MethodReturn => false,
        }
    }

    /// Bus-level match expression, for signal handlers only.
    #[must_use]
    pub fn match_expression(&self) -> Option<String> {
        (self.kind == MessageKind::Signal).then(|| {
            rules::signal_match_expression(self.interface.as_deref(), &self.member, self.rule.as_deref())
        })
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("interface", &self.interface)
            .field("member", &self.member)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Ordered set of handler entries.
#[derive(Debug)]
pub struct HandlerRegistry {
    slots: Vec<Option<Rc<HandlerEntry>>>,
    next_id: u64,
    walkers: usize,
}

impl HandlerRegistry {
    /// Creates an empty registry. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 1,
            walkers: 0,
        }
    }

    /// Registers a handler.
    ///
    /// Signal handlers are also subscribed on the bus with a match built
    /// from interface, member and rule; method call and error handlers need
    /// no subscription.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidHandlerKind` for method returns and
    /// `RegistryError::Subscribe` if the bus refuses the match. Nothing is
    /// registered in either case.
    pub fn register(
        &mut self,
        bus: &dyn Bus,
        kind: MessageKind,
        interface: Option<&str>,
        member: &str,
        rule: Option<&str>,
        callback: Callback,
    ) -> Result<HandlerId, RegistryError> {
        if kind == MessageKind::MethodReturn {
            return Err(RegistryError::InvalidHandlerKind(kind));
        }

        let filter = match rule {
            None => SignalFilter::Any,
            Some(text) => match Rule::parse(text) {
                Ok(rule) => SignalFilter::Rule(rule),
                Err(err) => {
                    warn_malformed(member, text, &err);
                    SignalFilter::Malformed
                }
            },
        };

        let id = HandlerId(self.next_id);
        let entry = HandlerEntry {
            id,
            kind,
            interface: interface.map(str::to_string),
            member: member.to_string(),
            rule: rule.map(str::to_string),
            filter,
            callback,
        };

        if let Some(expression) = entry.match_expression() {
            if let Err(source) = bus.add_match(&expression) {
                error!(%expression, error = %source, "failed to add match");
                return Err(RegistryError::Subscribe { expression, source });
            }
        }

        debug!(%id, %kind, interface, member, rule, "handler registered");
        self.next_id += 1;
        self.slots.push(Some(Rc::new(entry)));
        Ok(id)
    }

    /// Unregisters a handler, dropping its bus subscription.
    ///
    /// The entry is removed even if the bus fails to drop the match; that
    /// failure is only logged. Returns `false` for an unknown id.
    pub fn unregister(&mut self, bus: &dyn Bus, id: HandlerId) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|e| e.id == id))
        else {
            return false;
        };
        if let Some(entry) = slot.take() {
            release(bus, &entry);
        }
        self.compact_if_idle();
        true
    }

    /// Unregisters every handler.
    pub fn unregister_all(&mut self, bus: &dyn Bus) {
        for slot in &mut self.slots {
            if let Some(entry) = slot.take() {
                release(bus, &entry);
            }
        }
        self.compact_if_idle();
    }

    /// Looks up a live entry.
    #[must_use]
    pub fn get(&self, id: HandlerId) -> Option<&HandlerEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|e| e.id == id)
            .map(AsRef::as_ref)
    }

    #[must_use]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in dispatch order, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.slots.iter().rev().flatten().map(AsRef::as_ref)
    }

    // -- Walk protocol used by the dispatcher --

    /// Starts a walk and returns the slot count to walk down from.
    pub(crate) fn begin_walk(&mut self) -> usize {
        self.walkers += 1;
        self.slots.len()
    }

    /// Entry at `index` if it is still live.
    pub(crate) fn entry_at(&self, index: usize) -> Option<Rc<HandlerEntry>> {
        self.slots.get(index).and_then(Clone::clone)
    }

    pub(crate) fn end_walk(&mut self) {
        self.walkers = self.walkers.saturating_sub(1);
        self.compact_if_idle();
    }

    fn compact_if_idle(&mut self) {
        if self.walkers == 0 {
            self.slots.retain(Option::is_some);
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn release(bus: &dyn Bus, entry: &HandlerEntry) {
    if let Some(expression) = entry.match_expression() {
        if let Err(err) = bus.remove_match(&expression) {
            warn!(%expression, error = %err, "failed to remove match");
        }
    }
    debug!(id = %entry.id, member = %entry.member, "handler unregistered");
}

fn warn_malformed(member: &str, rule: &str, err: &RuleError) {
    warn!(member, rule, error = %err, "malformed rule, handler will never match");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
