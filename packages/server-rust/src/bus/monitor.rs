//! Owner monitoring: watching remote services come and go.
//!
//! A monitor is a signal handler for the bus daemon's `NameOwnerChanged`
//! narrowed by the rule `arg1='<service>'`. Monitors are grouped in bounded
//! lists owned by the context; each caller creates its own list.
//!
//! When a service is not owned at the moment monitoring starts, a synthetic
//! `NameOwnerChanged(service, service, "")` is scheduled as idle work and fed
//! through the dispatcher, so the caller sees the service as gone even though
//! the daemon will never report it.

use std::fmt;

use mcebus_core::{names, Message, MessageKind};
use tracing::{debug, warn};

use super::context::BusContext;
use super::registry::{Callback, HandlerId, RegistryError};

/// Handle to a monitor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorListId(usize);

impl fmt::Display for MonitorListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitors#{}", self.0)
    }
}

/// Watched services of one monitor list and their handlers, in insertion
/// order.
#[derive(Debug, Default)]
pub struct MonitorList {
    handlers: Vec<(String, HandlerId)>,
}

impl MonitorList {
    fn position(&self, service: &str) -> Option<usize> {
        self.handlers.iter().position(|(name, _)| name == service)
    }
}

/// Outcome of [`BusContext::owner_monitor_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAdd {
    /// The service was already monitored in this list; nothing changed.
    AlreadyMonitored,
    /// Monitoring started; carries the new list length.
    Added(usize),
    /// The list is full; nothing changed.
    Rejected,
}

/// Errors from monitor list operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("unknown monitor list {0}")]
    UnknownList(MonitorListId),
    #[error("{0} is not monitored")]
    NotMonitored(String),
    #[error("service name {0:?} cannot be quoted in a match rule")]
    InvalidServiceName(String),
    #[error(transparent)]
    Register(#[from] RegistryError),
}

fn owner_rule(service: &str) -> String {
    format!("arg1='{service}'")
}

impl BusContext {
    /// Creates an empty monitor list.
    pub fn monitor_list_new(&mut self) -> MonitorListId {
        self.monitor_lists.push(MonitorList::default());
        MonitorListId(self.monitor_lists.len() - 1)
    }

    fn monitor_list(&self, list: MonitorListId) -> Result<&MonitorList, MonitorError> {
        self.monitor_lists
            .get(list.0)
            .ok_or(MonitorError::UnknownList(list))
    }

    /// Starts watching `service` in `list`, holding at most `max` monitors.
    ///
    /// # Errors
    ///
    /// `MonitorError::UnknownList` for a stale list handle,
    /// `MonitorError::InvalidServiceName` for a name containing `'` and
    /// `MonitorError::Register` if the bus refuses the subscription.
    pub fn owner_monitor_add(
        &mut self,
        list: MonitorListId,
        service: &str,
        max: usize,
        callback: Callback,
    ) -> Result<MonitorAdd, MonitorError> {
        let monitors = self.monitor_list(list)?;
        if monitors.position(service).is_some() {
            return Ok(MonitorAdd::AlreadyMonitored);
        }
        if service.contains('\'') {
            warn!(service, "refusing to monitor unquotable service name");
            return Err(MonitorError::InvalidServiceName(service.to_string()));
        }
        if monitors.handlers.len() >= max {
            warn!(service, max, "monitor list full");
            return Ok(MonitorAdd::Rejected);
        }

        let rule = owner_rule(service);
        let id = self.handler_add(
            MessageKind::Signal,
            Some(names::DBUS_INTERFACE),
            names::NAME_OWNER_CHANGED,
            Some(&rule),
            callback,
        )?;

        let handlers = &mut self.monitor_lists[list.0].handlers;
        handlers.push((service.to_string(), id));
        let count = handlers.len();
        debug!(service, %list, count, "owner monitor added");

        let owned = self.bus().name_has_owner(service).unwrap_or_else(|err| {
            warn!(service, error = %err, "owner query failed, assuming gone");
            false
        });
        if !owned {
            let service = service.to_string();
            self.idle_add(move |ctx| {
                debug!(%service, "synthesizing owner gone");
                let gone = Message::name_owner_changed(&service, &service, "");
                ctx.dispatch(&gone).map(drop)
            });
        }

        Ok(MonitorAdd::Added(count))
    }

    /// Stops watching `service` in `list` and returns the new list length.
    ///
    /// # Errors
    ///
    /// `MonitorError::NotMonitored` if the service is not in the list.
    pub fn owner_monitor_remove(&mut self, list: MonitorListId, service: &str) -> Result<usize, MonitorError> {
        let index = self
            .monitor_list(list)?
            .position(service)
            .ok_or_else(|| MonitorError::NotMonitored(service.to_string()))?;

        let handlers = &mut self.monitor_lists[list.0].handlers;
        let (_, id) = handlers.remove(index);
        let count = handlers.len();
        self.handler_remove(id);
        debug!(service, %list, count, "owner monitor removed");
        Ok(count)
    }

    /// Stops every monitor in `list`.
    pub fn owner_monitor_remove_all(&mut self, list: MonitorListId) {
        let Some(monitors) = self.monitor_lists.get_mut(list.0) else {
            return;
        };
        for (_, id) in std::mem::take(&mut monitors.handlers) {
            self.handler_remove(id);
        }
    }

    /// Whether `service` is watched in `list`.
    #[must_use]
    pub fn is_owner_monitored(&self, list: MonitorListId, service: &str) -> bool {
        self.monitor_list(list)
            .is_ok_and(|monitors| monitors.position(service).is_some())
    }

    /// Number of monitors in `list`.
    #[must_use]
    pub fn monitor_count(&self, list: MonitorListId) -> usize {
        self.monitor_list(list).map_or(0, |monitors| monitors.handlers.len())
    }
}
