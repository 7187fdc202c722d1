//! Bus mediation: transport capability, handler registry, dispatcher, owner
//! monitoring and the context tying them together.

pub mod context;
pub mod dispatch;
pub mod memory;
pub mod monitor;
pub mod registry;
pub mod traits;

pub use context::{BusContext, IdleTask, InitError, ReplyCallback};
pub use dispatch::{DispatchResult, HandlerError, HandlerResult};
pub use memory::MemoryBus;
pub use monitor::{MonitorAdd, MonitorError, MonitorListId};
pub use registry::{Callback, HandlerEntry, HandlerId, HandlerRegistry, RegistryError};
pub use traits::{Bus, BusError, RequestNameReply};
