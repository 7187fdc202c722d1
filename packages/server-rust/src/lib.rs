//! mcebus server: bus mediation for the mode control entity. Owns the service
//! name, routes inbound messages to handlers, tracks peer lifetimes and serves
//! configuration requests.

pub mod bus;
pub mod logging;
pub mod service;
pub mod store;

pub use bus::{Bus, BusContext, BusError, DispatchResult, HandlerError, HandlerId, MemoryBus};
pub use service::ServiceConfig;
pub use store::{ConfigStore, MemoryConfigStore, StoreError};
