//! Config change signal.
//!
//! [`ConfigChangeNotifier`] observes the configuration store and broadcasts
//! `config_change_ind(key, value)` for every change, with the value encoded
//! exactly like a `get_config` reply.

use std::rc::Rc;

use mcebus_core::{marshal, Arg, ConfigValue, Message};
use tracing::{debug, error, warn};

use super::config::ServiceConfig;
use crate::bus::Bus;
use crate::store::ConfigObserver;

/// Member name of the change signal.
pub const CONFIG_CHANGE_IND: &str = "config_change_ind";

/// Store observer emitting the change signal.
pub struct ConfigChangeNotifier {
    bus: Rc<dyn Bus>,
    path: String,
    interface: String,
}

impl ConfigChangeNotifier {
    #[must_use]
    pub fn new(bus: Rc<dyn Bus>, config: &ServiceConfig) -> Self {
        Self {
            bus,
            path: config.signal_path.clone(),
            interface: config.signal_interface.clone(),
        }
    }

    fn signal(&self, key: &str, value: &ConfigValue) -> Result<Message, marshal::EncodeError> {
        let mut sig = Message::signal(&self.path, &self.interface, CONFIG_CHANGE_IND)
            .with_arg(Arg::string(key));
        marshal::append_value(&mut sig.writer(), value)?;
        Ok(sig)
    }
}

impl ConfigObserver for ConfigChangeNotifier {
    fn on_change(&self, key: &str, value: &ConfigValue) {
        debug!(key, "changed");
        let sig = match self.signal(key, value) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(key, error = %err, "cannot encode changed value, no signal sent");
                return;
            }
        };
        if let Err(err) = self.bus.send(sig) {
            error!(key, error = %err, "failed to send config change signal");
        }
    }
}
