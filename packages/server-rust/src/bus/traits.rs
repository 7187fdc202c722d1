use std::time::Duration;

use mcebus_core::Message;

/// Errors reported by the bus transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("not connected to the bus")]
    Disconnected,
    #[error("no reply received")]
    NoReply,
    #[error("{name}: {message}")]
    Remote { name: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outcome of asking the bus daemon for a well-known name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

/// Transport capability the mediation layer runs on.
///
/// Implementations own the connection, framing, serial allocation and
/// pending-call bookkeeping. Everything runs on one thread, so methods take
/// `&self` and implementations use interior mutability where they need it.
///
/// Inbound traffic is handed to [`BusContext::process`](super::BusContext::process)
/// by whoever drives the transport's event loop.
pub trait Bus {
    /// Queues a message for delivery and returns the serial assigned to it.
    fn send(&self, msg: Message) -> Result<u32, BusError>;

    /// Sends a method call and blocks until its reply, an error reply or the
    /// timeout. No other traffic is processed meanwhile.
    ///
    /// An error reply from the peer is returned as an `Ok` message of kind
    /// `Error`; `Err` is reserved for transport failures and timeouts.
    fn send_blocking(&self, msg: Message, timeout: Duration) -> Result<Message, BusError>;

    /// Starts routing inbound messages to the dispatcher.
    fn add_filter(&self) -> Result<(), BusError>;

    /// Subscribes to broadcast messages matching `expression`.
    fn add_match(&self, expression: &str) -> Result<(), BusError>;

    /// Drops a subscription previously made with the same `expression`.
    fn remove_match(&self, expression: &str) -> Result<(), BusError>;

    /// Asks the daemon for ownership of a well-known name.
    fn request_name(&self, name: &str) -> Result<RequestNameReply, BusError>;

    /// Whether some connection currently owns `name`.
    fn name_has_owner(&self, name: &str) -> Result<bool, BusError>;
}
