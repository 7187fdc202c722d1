//! Configuration store capability, change observers and the in-memory store.

pub mod memory;
pub mod observer;
pub mod traits;

pub use memory::MemoryConfigStore;
pub use observer::CompositeConfigObserver;
pub use traits::{ConfigObserver, ConfigStore, ObserverId, StoreError};
