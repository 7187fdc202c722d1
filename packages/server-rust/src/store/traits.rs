use std::rc::Rc;

use mcebus_core::ConfigValue;

/// Errors reported by a configuration store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no value set for {0}")]
    NoSuchKey(String),
    #[error("{key} holds a {expected} value, refusing {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid seed document: {0}")]
    Seed(#[from] serde_json::Error),
    #[error("seed value for {0} mixes list element kinds")]
    MalformedSeed(String),
    /// Backend failure, with the backend's message if it gave one.
    #[error("{}", .0.as_deref().unwrap_or("unknown"))]
    Backend(Option<String>),
}

impl StoreError {
    /// Text sent back to bus clients.
    #[must_use]
    pub fn reply_text(&self) -> String {
        let text = self.to_string();
        if text.is_empty() {
            "unknown".to_string()
        } else {
            text
        }
    }
}

/// Registration token for a [`ConfigObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Observer for changes made to a [`ConfigStore`].
///
/// Used as `Rc<dyn ConfigObserver>`.
pub trait ConfigObserver {
    /// Called after `key` changed to `value`.
    fn on_change(&self, key: &str, value: &ConfigValue);
}

/// Backing configuration store.
///
/// Methods take `&self`; implementations are single-threaded and use
/// interior mutability.
pub trait ConfigStore {
    /// Reads the value of `key`.
    fn get(&self, key: &str) -> Result<ConfigValue, StoreError>;

    /// Writes `value` to `key`. Observers are notified when the stored
    /// value actually changed.
    fn set(&self, key: &str, value: ConfigValue) -> Result<(), StoreError>;

    /// Hints that pending writes should be persisted now.
    fn suggest_sync(&self) -> Result<(), StoreError>;

    /// Registers a change observer.
    fn subscribe(&self, observer: Rc<dyn ConfigObserver>) -> ObserverId;

    /// Removes an observer. Returns `false` for an unknown id.
    fn unsubscribe(&self, id: ObserverId) -> bool;
}
