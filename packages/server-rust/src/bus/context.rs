//! Per-connection mediation state.
//!
//! [`BusContext`] owns the transport handle, the configuration store handle,
//! the handler registry, the owner monitor lists and the queue of deferred
//! work. Every operation of the layer goes through it, and handler callbacks
//! receive it mutably so they can send, register and unregister.
//!
//! # Single-Threaded Design
//!
//! Shared handles are `Rc`; nothing here is `Send`. The embedding event loop
//! feeds inbound messages to [`BusContext::process`] one at a time.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context as _;
use mcebus_core::{names, Arg, Message, MessageKind};
use tracing::{debug, error, info, trace, warn};

use super::dispatch::{DispatchResult, HandlerError, HandlerResult};
use super::monitor::MonitorList;
use super::registry::{Callback, HandlerId, HandlerRegistry, RegistryError};
use super::traits::{Bus, BusError, RequestNameReply};
use crate::service::notify::ConfigChangeNotifier;
use crate::service::{requests, ServiceConfig};
use crate::store::{ConfigStore, ObserverId};

/// Work scheduled to run after the current dispatch.
pub type IdleTask = Box<dyn FnOnce(&mut BusContext) -> HandlerResult>;

/// Continuation for the reply to an asynchronous method call.
pub type ReplyCallback = Box<dyn FnOnce(&mut BusContext, &Message) -> HandlerResult>;

/// Errors from bringing the service up on the bus.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to request name {name}")]
    RequestName {
        name: String,
        #[source]
        source: BusError,
    },
    #[error("not primary owner of {name} ({reply:?})")]
    NotPrimaryOwner { name: String, reply: RequestNameReply },
    #[error("failed to install message filter")]
    Filter(#[source] BusError),
    #[error("failed to register request handlers")]
    Register(#[from] RegistryError),
}

/// Mediation state for one bus connection.
pub struct BusContext {
    bus: Rc<dyn Bus>,
    store: Rc<dyn ConfigStore>,
    config: ServiceConfig,
    registry: HandlerRegistry,
    pub(super) monitor_lists: Vec<MonitorList>,
    idle: VecDeque<IdleTask>,
    pending_replies: HashMap<u32, ReplyCallback>,
    builtin_handlers: Vec<HandlerId>,
    notifier: Option<ObserverId>,
}

impl BusContext {
    /// Creates a context without touching the bus.
    #[must_use]
    pub fn new(bus: Rc<dyn Bus>, store: Rc<dyn ConfigStore>, config: ServiceConfig) -> Self {
        Self {
            bus,
            store,
            config,
            registry: HandlerRegistry::new(),
            monitor_lists: Vec::new(),
            idle: VecDeque::new(),
            pending_replies: HashMap::new(),
            builtin_handlers: Vec::new(),
            notifier: None,
        }
    }

    /// Brings the service up on the bus.
    ///
    /// Acquires the configured service name (primary ownership is required),
    /// starts receiving inbound traffic, registers the built-in request
    /// handlers and hooks the config change signal to the store.
    ///
    /// # Errors
    ///
    /// Returns an [`InitError`] for the first step that fails. Handlers
    /// registered before the failure are unregistered again.
    pub fn init(
        bus: Rc<dyn Bus>,
        store: Rc<dyn ConfigStore>,
        config: ServiceConfig,
    ) -> Result<Self, InitError> {
        let mut ctx = Self::new(bus, store, config);
        let name = ctx.config.service_name.clone();

        let reply = ctx
            .bus
            .request_name(&name)
            .map_err(|source| InitError::RequestName {
                name: name.clone(),
                source,
            })?;
        if reply != RequestNameReply::PrimaryOwner {
            error!(service = %name, ?reply, "cannot acquire service name");
            return Err(InitError::NotPrimaryOwner { name, reply });
        }

        ctx.bus.add_filter().map_err(InitError::Filter)?;

        match requests::install(&mut ctx) {
            Ok(ids) => ctx.builtin_handlers = ids,
            Err(err) => {
                ctx.shutdown();
                return Err(err.into());
            }
        }

        let notifier = ConfigChangeNotifier::new(Rc::clone(&ctx.bus), &ctx.config);
        ctx.notifier = Some(ctx.store.subscribe(Rc::new(notifier)));

        info!(service = %name, version = %ctx.config.version, "bus service ready");
        Ok(ctx)
    }

    /// Tears everything down: unregisters every handler (dropping bus
    /// matches), forgets monitor lists, pending replies and idle work, and
    /// unhooks the change notifier.
    pub fn shutdown(&mut self) {
        self.registry.unregister_all(&*self.bus);
        self.monitor_lists.clear();
        self.builtin_handlers.clear();
        self.idle.clear();
        self.pending_replies.clear();
        if let Some(id) = self.notifier.take() {
            self.store.unsubscribe(id);
        }
        debug!("bus context shut down");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn bus(&self) -> &dyn Bus {
        &*self.bus
    }

    #[must_use]
    pub fn store(&self) -> &dyn ConfigStore {
        &*self.store
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub(super) fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Ids of the `get_version`, `get_config` and `set_config` handlers.
    #[must_use]
    pub fn builtin_handlers(&self) -> &[HandlerId] {
        &self.builtin_handlers
    }

    // -----------------------------------------------------------------------
    // Handler registration
    // -----------------------------------------------------------------------

    /// Registers a handler. See [`HandlerRegistry::register`].
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryError`].
    pub fn handler_add(
        &mut self,
        kind: MessageKind,
        interface: Option<&str>,
        member: &str,
        rule: Option<&str>,
        callback: Callback,
    ) -> Result<HandlerId, RegistryError> {
        self.registry
            .register(&*self.bus, kind, interface, member, rule, callback)
    }

    /// Unregisters a handler. Returns `false` for an unknown id.
    pub fn handler_remove(&mut self, id: HandlerId) -> bool {
        self.registry.unregister(&*self.bus, id)
    }

    // -----------------------------------------------------------------------
    // Event loop integration
    // -----------------------------------------------------------------------

    /// Schedules `task` to run once the current dispatch is over.
    pub fn idle_add(&mut self, task: impl FnOnce(&mut BusContext) -> HandlerResult + 'static) {
        self.idle.push_back(Box::new(task));
    }

    /// Number of deferred tasks waiting to run.
    #[must_use]
    pub fn idle_pending(&self) -> usize {
        self.idle.len()
    }

    /// Runs deferred work until the queue is empty, including tasks queued
    /// by tasks. Returns how many ran.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first fatal [`HandlerError`].
    pub fn run_idle(&mut self) -> Result<usize, HandlerError> {
        let mut ran = 0;
        while let Some(task) = self.idle.pop_front() {
            ran += 1;
            if let Err(err) = task(self) {
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(error = %err, "deferred task failed");
            }
        }
        Ok(ran)
    }

    /// Handles one inbound message: completes a pending call it answers,
    /// dispatches it, then drains deferred work.
    ///
    /// # Errors
    ///
    /// Fails on fatal handler errors; the embedding process should stop.
    pub fn process(&mut self, msg: &Message) -> anyhow::Result<DispatchResult> {
        if matches!(msg.kind(), MessageKind::MethodReturn | MessageKind::Error) {
            let pending = msg
                .reply_serial()
                .and_then(|serial| self.pending_replies.remove(&serial));
            if let Some(on_reply) = pending {
                match on_reply(self, msg) {
                    Err(err) if err.is_fatal() => {
                        return Err(err).context("reply continuation failed");
                    }
                    Err(err) => warn!(error = %err, "reply continuation failed"),
                    Ok(()) => {}
                }
            }
        }

        let result = self.dispatch(msg).with_context(|| {
            format!(
                "dispatching {} {}",
                msg.kind(),
                msg.member().or(msg.error_name()).unwrap_or("<unnamed>")
            )
        })?;
        self.run_idle().context("running deferred work")?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Outbound traffic
    // -----------------------------------------------------------------------

    /// Sends a message, logging failures.
    ///
    /// # Errors
    ///
    /// Propagates the transport's [`BusError`].
    pub fn send(&self, msg: Message) -> Result<u32, BusError> {
        self.bus.send(msg).inspect_err(|err| {
            error!(error = %err, "failed to send message");
        })
    }

    /// Sends `reply` to `request` unless the caller asked for no reply.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Send` if the transport fails.
    pub fn reply(&self, request: &Message, reply: Message) -> HandlerResult {
        if request.no_reply() {
            trace!(serial = request.serial(), "reply suppressed");
            return Ok(());
        }
        self.send(reply)?;
        Ok(())
    }

    /// Emits a signal.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Send` if the transport fails.
    pub fn send_signal(&self, path: &str, interface: &str, member: &str, args: Vec<Arg>) -> HandlerResult {
        self.send(Message::signal(path, interface, member).with_args(args))?;
        Ok(())
    }

    /// Sends a method call. With `on_reply` the continuation runs when the
    /// reply or error arrives through [`BusContext::process`]; without it
    /// the call is marked no-reply.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Send` if the transport fails.
    pub fn call_method(
        &mut self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Arg>,
        on_reply: Option<ReplyCallback>,
    ) -> HandlerResult {
        let mut msg = Message::method_call(destination, path, interface, member).with_args(args);
        msg.set_no_reply(on_reply.is_none());
        let serial = self.send(msg)?;
        if let Some(on_reply) = on_reply {
            self.pending_replies.insert(serial, on_reply);
        }
        Ok(())
    }

    /// Number of calls still waiting for their reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending_replies.len()
    }

    /// Sends a method call and waits for the reply. Nothing else is processed
    /// while waiting. `None` uses the configured call timeout.
    ///
    /// # Errors
    ///
    /// Transport failures and timeouts as reported by the bus; an error reply
    /// from the peer becomes `BusError::Remote`.
    pub fn call_blocking(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Arg>,
        timeout: Option<Duration>,
    ) -> Result<Message, BusError> {
        let msg = Message::method_call(destination, path, interface, member).with_args(args);
        let timeout = timeout.unwrap_or_else(|| self.config.call_timeout());
        let reply = self.bus.send_blocking(msg, timeout)?;
        if reply.kind() == MessageKind::Error {
            return Err(BusError::Remote {
                name: reply.error_name().unwrap_or_default().to_string(),
                message: reply
                    .arg(0)
                    .and_then(Arg::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(reply)
    }

    /// Process id of the connection owning `bus_name`, or `None` if it
    /// cannot be determined.
    #[must_use]
    pub fn pid_of(&self, bus_name: &str) -> Option<u32> {
        let reply = self.call_blocking(
            names::DBUS_SERVICE,
            names::DBUS_PATH,
            names::DBUS_INTERFACE,
            names::GET_CONNECTION_UNIX_PROCESS_ID,
            vec![Arg::string(bus_name)],
            None,
        );
        match reply {
            Ok(reply) => match reply.arg(0) {
                Some(Arg::UInt32(pid)) => Some(*pid),
                other => {
                    warn!(bus_name, reply = ?other, "unexpected pid reply");
                    None
                }
            },
            Err(err) => {
                warn!(bus_name, error = %err, "pid lookup failed");
                None
            }
        }
    }
}
