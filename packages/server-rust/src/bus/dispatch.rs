//! Inbound message dispatch.

use mcebus_core::{Message, MessageError, MessageKind};
use tracing::{error, trace, warn};

use super::context::BusContext;
use super::traits::BusError;

/// Whether the dispatcher consumed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// A method call handler took the message.
    Handled,
    /// Nothing consumed it; other transport filters may still want it.
    NotHandled,
}

/// Errors returned by handler callbacks and deferred work.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to send message: {0}")]
    Send(#[from] BusError),
    #[error("failed to construct message: {0}")]
    Construct(#[from] MessageError),
}

impl HandlerError {
    /// Construction failures leave the service unable to answer anyone and
    /// must stop it; send failures only affect one message.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Construct(_))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

impl BusContext {
    /// Routes one inbound message to the registered handlers.
    ///
    /// Handlers are consulted newest first. A method call goes to the first
    /// matching handler only; signals and errors go to every matching
    /// handler. Handlers may register and unregister freely while running:
    /// entries added during the walk are not visited, removed entries are
    /// skipped.
    ///
    /// Returns `Handled` only when a method call handler ran.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`HandlerError`]; remaining handlers are not
    /// run. Non-fatal errors are logged and dispatch continues.
    pub fn dispatch(&mut self, msg: &Message) -> Result<DispatchResult, HandlerError> {
        let mut result = DispatchResult::NotHandled;
        let mut fatal = None;

        let end = self.registry_mut().begin_walk();
        for index in (0..end).rev() {
            let Some(entry) = self.registry().entry_at(index) else {
                continue;
            };
            if !entry.matches(msg) {
                continue;
            }

            trace!(id = %entry.id(), kind = %msg.kind(), member = entry.member(), "invoking handler");
            if let Err(err) = (entry.callback())(self, msg) {
                if err.is_fatal() {
                    error!(id = %entry.id(), member = entry.member(), error = %err, "fatal handler error");
                    fatal = Some(err);
                    break;
                }
                warn!(id = %entry.id(), member = entry.member(), error = %err, "handler failed");
            }

            if entry.kind() == MessageKind::MethodCall {
                result = DispatchResult::Handled;
                break;
            }
        }
        self.registry_mut().end_walk();

        match fatal {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use mcebus_core::Arg;

    use super::*;
    use crate::bus::registry::Callback;
    use crate::bus::{HandlerId, MemoryBus};
    use crate::service::ServiceConfig;
    use crate::store::MemoryConfigStore;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn context() -> BusContext {
        BusContext::new(
            Rc::new(MemoryBus::new()),
            Rc::new(MemoryConfigStore::new()),
            ServiceConfig::default(),
        )
    }

    fn recorder(log: &Log, label: &'static str) -> Callback {
        let log = Rc::clone(log);
        Rc::new(move |_, _| {
            log.borrow_mut().push(label);
            Ok(())
        })
    }

    fn add(ctx: &mut BusContext, kind: MessageKind, member: &str, rule: Option<&str>, cb: Callback) -> HandlerId {
        ctx.handler_add(kind, Some("com.example"), member, rule, cb).unwrap()
    }

    fn call(member: &str) -> Message {
        Message::method_call("com.example", "/", "com.example", member)
    }

    fn signal(member: &str, arg: &str) -> Message {
        Message::signal("/", "com.example", member).with_arg(Arg::string(arg))
    }

    #[test]
    fn method_call_goes_to_newest_match_only() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::MethodCall, "Ping", None, recorder(&log, "old"));
        add(&mut ctx, MessageKind::MethodCall, "Ping", None, recorder(&log, "new"));

        assert_eq!(ctx.dispatch(&call("Ping")).unwrap(), DispatchResult::Handled);
        assert_eq!(*log.borrow(), vec!["new"]);
    }

    #[test]
    fn signals_fan_out_and_report_not_handled() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::Signal, "Changed", None, recorder(&log, "a"));
        add(&mut ctx, MessageKind::Signal, "Changed", Some("arg0='x'"), recorder(&log, "b"));
        add(&mut ctx, MessageKind::Signal, "Changed", Some("arg0='y'"), recorder(&log, "c"));

        assert_eq!(ctx.dispatch(&signal("Changed", "x")).unwrap(), DispatchResult::NotHandled);
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn errors_fan_out() {
        let mut ctx = context();
        let log = Log::default();
        for label in ["a", "b"] {
            ctx.handler_add(MessageKind::Error, None, "com.example.Error.Failed", None, recorder(&log, label))
                .unwrap();
        }
        let err = Message::error("com.example.Error.Failed", 1, "boom");
        assert_eq!(ctx.dispatch(&err).unwrap(), DispatchResult::NotHandled);
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn unmatched_message_is_not_handled() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::MethodCall, "Ping", None, recorder(&log, "ping"));
        assert_eq!(ctx.dispatch(&call("Pong")).unwrap(), DispatchResult::NotHandled);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn handler_removing_itself_does_not_disturb_walk() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::Signal, "Changed", None, recorder(&log, "first"));

        let own_id: Rc<RefCell<Option<HandlerId>>> = Rc::default();
        let cb: Callback = {
            let log = Rc::clone(&log);
            let own_id = Rc::clone(&own_id);
            Rc::new(move |ctx, _| {
                log.borrow_mut().push("self-removing");
                if let Some(id) = own_id.borrow_mut().take() {
                    ctx.handler_remove(id);
                }
                Ok(())
            })
        };
        let id = add(&mut ctx, MessageKind::Signal, "Changed", None, cb);
        *own_id.borrow_mut() = Some(id);
        add(&mut ctx, MessageKind::Signal, "Changed", None, recorder(&log, "last"));

        ctx.dispatch(&signal("Changed", "x")).unwrap();
        assert_eq!(*log.borrow(), vec!["last", "self-removing", "first"]);

        log.borrow_mut().clear();
        ctx.dispatch(&signal("Changed", "x")).unwrap();
        assert_eq!(*log.borrow(), vec!["last", "first"]);
        assert_eq!(ctx.registry().len(), 2);
    }

    #[test]
    fn handler_removing_a_later_entry_skips_it() {
        let mut ctx = context();
        let log = Log::default();
        let victim = add(&mut ctx, MessageKind::Signal, "Changed", None, recorder(&log, "victim"));
        let cb: Callback = {
            let log = Rc::clone(&log);
            Rc::new(move |ctx, _| {
                log.borrow_mut().push("killer");
                ctx.handler_remove(victim);
                Ok(())
            })
        };
        add(&mut ctx, MessageKind::Signal, "Changed", None, cb);

        ctx.dispatch(&signal("Changed", "x")).unwrap();
        assert_eq!(*log.borrow(), vec!["killer"]);
    }

    #[test]
    fn handler_added_during_dispatch_waits_for_next_message() {
        let mut ctx = context();
        let log = Log::default();
        let cb: Callback = {
            let log = Rc::clone(&log);
            Rc::new(move |ctx, _| {
                log.borrow_mut().push("adder");
                let late = recorder(&log, "late");
                ctx.handler_add(MessageKind::Signal, Some("com.example"), "Changed", None, late)
                    .map(drop)
                    .map_err(|_| HandlerError::Send(BusError::Disconnected))
            })
        };
        add(&mut ctx, MessageKind::Signal, "Changed", None, cb);

        ctx.dispatch(&signal("Changed", "x")).unwrap();
        assert_eq!(*log.borrow(), vec!["adder"]);
    }

    #[test]
    fn reentrant_dispatch_is_tolerated() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::Signal, "Inner", None, recorder(&log, "inner"));
        let cb: Callback = {
            let log = Rc::clone(&log);
            Rc::new(move |ctx, _| {
                log.borrow_mut().push("outer");
                ctx.dispatch(&signal("Inner", "x")).map(drop)
            })
        };
        add(&mut ctx, MessageKind::Signal, "Outer", None, cb);

        ctx.dispatch(&signal("Outer", "x")).unwrap();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn fatal_error_stops_dispatch() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::Signal, "Changed", None, recorder(&log, "never"));
        add(
            &mut ctx,
            MessageKind::Signal,
            "Changed",
            None,
            Rc::new(|_, _| Err(HandlerError::Construct(MessageError::VariantArity(0)))),
        );

        let err = ctx.dispatch(&signal("Changed", "x")).unwrap_err();
        assert!(err.is_fatal());
        assert!(log.borrow().is_empty());
        assert_eq!(ctx.registry().len(), 2);
    }

    #[test]
    fn send_error_is_not_fatal() {
        let mut ctx = context();
        let log = Log::default();
        add(&mut ctx, MessageKind::Signal, "Changed", None, recorder(&log, "still runs"));
        add(
            &mut ctx,
            MessageKind::Signal,
            "Changed",
            None,
            Rc::new(|_, _| Err(HandlerError::Send(BusError::Disconnected))),
        );
        assert!(ctx.dispatch(&signal("Changed", "x")).is_ok());
        assert_eq!(*log.borrow(), vec!["still runs"]);
    }
}
