//! Well-known names of the bus daemon and the standard error names.

/// Bus name of the message bus daemon itself.
pub const DBUS_SERVICE: &str = "org.freedesktop.DBus";

/// Object path of the bus daemon.
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Interface of the bus daemon.
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Lifecycle signal: `NameOwnerChanged(name, old_owner, new_owner)`.
pub const NAME_OWNER_CHANGED: &str = "NameOwnerChanged";

/// Daemon method resolving a bus name to the owning process id.
pub const GET_CONNECTION_UNIX_PROCESS_ID: &str = "GetConnectionUnixProcessID";

/// Standard error for malformed requests.
pub const ERROR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
