//! In-memory [`ConfigStore`] implementation.
//!
//! Keys are typed by their first value: a later write must keep the kind
//! (same scalar kind, or a list with the same element kind). Writes that do
//! not change the stored value are accepted silently without notifying.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use mcebus_core::ConfigValue;
use tracing::{debug, trace};

use super::observer::CompositeConfigObserver;
use super::traits::{ConfigObserver, ConfigStore, ObserverId, StoreError};

/// Configuration store held entirely in memory.
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: RefCell<HashMap<String, ConfigValue>>,
    observers: RefCell<CompositeConfigObserver>,
    syncs: Cell<usize>,
    sync_failure: RefCell<Option<Option<String>>>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = (String, ConfigValue)>) -> Self {
        let store = Self::new();
        store.entries.borrow_mut().extend(entries);
        store
    }

    /// Creates a store from a JSON object mapping keys to tagged values, e.g.
    /// `{"/system/x": {"type": "int", "value": 3}}`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Seed` if the document does not have that shape
    /// and `StoreError::MalformedSeed` for a list whose elements are not all
    /// of its declared kind.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let entries: HashMap<String, ConfigValue> = serde_json::from_str(json)?;
        if let Some((key, _)) = entries.iter().find(|(_, value)| !value.is_well_formed()) {
            return Err(StoreError::MalformedSeed(key.clone()));
        }
        debug!(keys = entries.len(), "seeded config store");
        Ok(Self::with_entries(entries))
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// How many times `suggest_sync` succeeded.
    #[must_use]
    pub fn sync_count(&self) -> usize {
        self.syncs.get()
    }

    /// Makes subsequent `suggest_sync` calls fail with the given backend
    /// message, or succeed again when `fail` is `false`.
    pub fn fail_sync(&self, fail: bool, message: Option<&str>) {
        *self.sync_failure.borrow_mut() = fail.then(|| message.map(str::to_string));
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Result<ConfigValue, StoreError> {
        self.entries
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchKey(key.to_string()))
    }

    fn set(&self, key: &str, value: ConfigValue) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.borrow_mut();
            if let Some(old) = entries.get(key) {
                if !old.same_kind(&value) {
                    return Err(StoreError::TypeMismatch {
                        key: key.to_string(),
                        expected: old.kind_name(),
                        found: value.kind_name(),
                    });
                }
                if *old == value {
                    trace!(key, "value unchanged");
                    return Ok(());
                }
            }
            entries.insert(key.to_string(), value.clone());
        }

        // Observers may read the store back, so no borrow is held here.
        let observers = self.observers.borrow().clone();
        observers.on_change(key, &value);
        Ok(())
    }

    fn suggest_sync(&self) -> Result<(), StoreError> {
        if let Some(message) = self.sync_failure.borrow().clone() {
            return Err(StoreError::Backend(message));
        }
        self.syncs.set(self.syncs.get() + 1);
        Ok(())
    }

    fn subscribe(&self, observer: Rc<dyn ConfigObserver>) -> ObserverId {
        self.observers.borrow_mut().add(observer)
    }

    fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.borrow_mut().remove(id)
    }
}
