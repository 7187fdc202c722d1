//! Composite change observer.
//!
//! [`CompositeConfigObserver`] fans a single change notification out to every
//! registered [`ConfigObserver`], in registration order.

use std::rc::Rc;

use mcebus_core::ConfigValue;

use super::traits::{ConfigObserver, ObserverId};

/// Composite observer that fans out to multiple observers.
#[derive(Clone, Default)]
pub struct CompositeConfigObserver {
    observers: Vec<(ObserverId, Rc<dyn ConfigObserver>)>,
    next_id: u64,
}

impl CompositeConfigObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer and returns its token.
    pub fn add(&mut self, observer: Rc<dyn ConfigObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push((id, observer));
        id
    }

    /// Removes an observer. Returns `false` for an unknown id.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ConfigObserver for CompositeConfigObserver {
    fn on_change(&self, key: &str, value: &ConfigValue) {
        for (_, observer) in &self.observers {
            observer.on_change(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct RecordingObserver {
        seen: RefCell<Vec<(String, ConfigValue)>>,
    }

    impl ConfigObserver for RecordingObserver {
        fn on_change(&self, key: &str, value: &ConfigValue) {
            self.seen.borrow_mut().push((key.to_string(), value.clone()));
        }
    }

    #[test]
    fn empty_composite_does_nothing() {
        let composite = CompositeConfigObserver::new();
        composite.on_change("/k", &ConfigValue::Int(1));
        assert!(composite.is_empty());
    }

    #[test]
    fn every_observer_sees_every_change() {
        let a = Rc::new(RecordingObserver::default());
        let b = Rc::new(RecordingObserver::default());
        let mut composite = CompositeConfigObserver::new();
        composite.add(a.clone());
        composite.add(b.clone());

        composite.on_change("/k", &ConfigValue::Bool(true));
        assert_eq!(a.seen.borrow().len(), 1);
        assert_eq!(*a.seen.borrow(), *b.seen.borrow());
    }

    #[test]
    fn removed_observer_is_silent() {
        let a = Rc::new(RecordingObserver::default());
        let mut composite = CompositeConfigObserver::new();
        let id = composite.add(a.clone());
        assert!(composite.remove(id));
        assert!(!composite.remove(id));

        composite.on_change("/k", &ConfigValue::Int(2));
        assert!(a.seen.borrow().is_empty());
    }
}
