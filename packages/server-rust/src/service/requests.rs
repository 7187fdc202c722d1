//! Built-in request handlers: `get_version`, `get_config` and `set_config`.
//!
//! Keys may be strings or object paths. A value for `set_config` is a
//! variant, or a bare array.

use std::rc::Rc;

use mcebus_core::{marshal, names, Arg, Message, MessageKind};
use tracing::{debug, error, warn};

use crate::bus::{BusContext, HandlerId, HandlerResult, RegistryError};

pub const GET_VERSION: &str = "get_version";
pub const GET_CONFIG: &str = "get_config";
pub const SET_CONFIG: &str = "set_config";

/// Registers the three request handlers on the configured request interface.
///
/// # Errors
///
/// Propagates [`RegistryError`]; handlers registered before the failure are
/// left in place for the caller to clean up.
pub fn install(ctx: &mut BusContext) -> Result<Vec<HandlerId>, RegistryError> {
    let interface = ctx.config().request_interface.clone();
    let handlers: [(&str, fn(&mut BusContext, &Message) -> HandlerResult); 3] = [
        (GET_VERSION, version_get),
        (GET_CONFIG, config_get),
        (SET_CONFIG, config_set),
    ];

    handlers
        .into_iter()
        .map(|(member, handler)| {
            ctx.handler_add(MessageKind::MethodCall, Some(&interface), member, None, Rc::new(handler))
        })
        .collect()
}

/// First argument as a key: a string or an object path.
fn request_key(msg: &Message) -> Option<&str> {
    match msg.arg(0)? {
        Arg::String(key) | Arg::ObjectPath(key) => Some(key),
        _ => None,
    }
}

fn invalid_args(ctx: &BusContext, msg: &Message, text: &str) -> HandlerResult {
    warn!(member = msg.member(), reason = text, "invalid request");
    let reply = Message::error_reply(msg, names::ERROR_INVALID_ARGS, text)?;
    ctx.reply(msg, reply)
}

fn version_get(ctx: &mut BusContext, msg: &Message) -> HandlerResult {
    debug!("received version information request");
    let reply = Message::method_return(msg)?.with_arg(Arg::string(&ctx.config().version));
    ctx.reply(msg, reply)
}

fn config_get(ctx: &mut BusContext, msg: &Message) -> HandlerResult {
    debug!("received configuration query request");
    let Some(key) = request_key(msg) else {
        return invalid_args(ctx, msg, "expected string/object path");
    };
    let error_name = &ctx.config().error_name;

    let reply = match ctx.store().get(key) {
        Ok(value) => {
            let mut reply = Message::method_return(msg)?;
            let encoded = marshal::append_value(&mut reply.writer(), &value);
            match encoded {
                Ok(()) => reply,
                Err(err) => {
                    error!(key, error = %err, "cannot encode config value");
                    Message::error_reply(msg, error_name, "constructing reply failed")?
                }
            }
        }
        Err(err) => {
            debug!(key, error = %err, "config query failed");
            Message::error_reply(msg, error_name, &err.reply_text())?
        }
    };
    ctx.reply(msg, reply)
}

fn config_set(ctx: &mut BusContext, msg: &Message) -> HandlerResult {
    debug!("received configuration change request");
    let Some(key) = request_key(msg) else {
        return invalid_args(ctx, msg, "expected string/object path");
    };
    let Some(value_arg) = msg.arg(1) else {
        return invalid_args(ctx, msg, "expected variant");
    };
    let value = match marshal::decode(value_arg) {
        Ok(value) => value,
        Err(err) => return invalid_args(ctx, msg, &err.to_string()),
    };

    let store = ctx.store();
    let reply = match store.set(key, value) {
        Ok(()) => {
            if let Err(err) = store.suggest_sync() {
                error!(error = %err, "config sync failed");
            }
            Message::method_return(msg)?.with_arg(Arg::Boolean(true))
        }
        Err(err) => {
            warn!(key, error = %err, "config change rejected");
            Message::error_reply(msg, &ctx.config().error_name, &err.reply_text())?
        }
    };
    ctx.reply(msg, reply)
}
