//! Application-level view of bus messages.
//!
//! A [`Message`] carries the routing header fields the dispatcher and the
//! rule evaluator look at (kind, path, interface, member, error name) plus a
//! body of typed [`Arg`] values. Framing and wire encoding belong to the
//! transport and are not modelled here.
//!
//! Bodies are built either by pushing complete arguments or through the
//! scoped [`ArgWriter`]/[`Container`] builders. A container stages its
//! contents privately and only lands in the parent once `close()` succeeds;
//! dropping an unclosed container abandons it, so a failed encode never
//! leaves a half-built variant or array in the message.

use std::fmt;

use thiserror::Error;
use tracing::trace;

use crate::names;

// ---------------------------------------------------------------------------
// Message kinds and argument types
// ---------------------------------------------------------------------------

/// The four bus message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MethodCall => "method_call",
            Self::MethodReturn => "method_return",
            Self::Error => "error",
            Self::Signal => "signal",
        })
    }
}

/// Wire type of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    Boolean,
    Int32,
    UInt32,
    Int64,
    Double,
    String,
    ObjectPath,
    Array,
    Variant,
}

impl ArgType {
    /// Single-character type code used in signatures.
    #[must_use]
    pub fn code(self) -> char {
        match self {
            Self::Boolean => 'b',
            Self::Int32 => 'i',
            Self::UInt32 => 'u',
            Self::Int64 => 'x',
            Self::Double => 'd',
            Self::String => 's',
            Self::ObjectPath => 'o',
            Self::Array => 'a',
            Self::Variant => 'v',
        }
    }

    /// Inverse of [`ArgType::code`].
    #[must_use]
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => Self::Boolean,
            'i' => Self::Int32,
            'u' => Self::UInt32,
            'x' => Self::Int64,
            'd' => Self::Double,
            's' => Self::String,
            'o' => Self::ObjectPath,
            'a' => Self::Array,
            'v' => Self::Variant,
            _ => return None,
        })
    }
}

/// Type signature of a single complete argument, e.g. `"s"`, `"ai"`, `"v"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Signature of a non-array type.
    #[must_use]
    pub fn of(ty: ArgType) -> Self {
        Self(ty.code().to_string())
    }

    /// Signature of an array with the given element signature.
    #[must_use]
    pub fn array_of(element: &Signature) -> Self {
        Self(format!("a{}", element.0))
    }

    /// Wraps a raw signature string without validation.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Outermost type of the signature.
    #[must_use]
    pub fn arg_type(&self) -> Option<ArgType> {
        self.0.chars().next().and_then(ArgType::from_code)
    }

    /// Element signature if this is an array signature.
    #[must_use]
    pub fn element(&self) -> Option<Signature> {
        self.0
            .strip_prefix('a')
            .filter(|rest| !rest.is_empty())
            .map(Signature::new)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single typed message argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Double(f64),
    String(String),
    ObjectPath(String),
    /// Array with a declared element signature.
    ///
    /// The items are not checked against `element` here; arrays built via
    /// [`Container`] are, arrays received from the wire may not be.
    Array {
        element: Signature,
        items: Vec<Arg>,
    },
    Variant(Box<Arg>),
}

impl Arg {
    #[must_use]
    pub fn arg_type(&self) -> ArgType {
        match self {
            Self::Boolean(_) => ArgType::Boolean,
            Self::Int32(_) => ArgType::Int32,
            Self::UInt32(_) => ArgType::UInt32,
            Self::Int64(_) => ArgType::Int64,
            Self::Double(_) => ArgType::Double,
            Self::String(_) => ArgType::String,
            Self::ObjectPath(_) => ArgType::ObjectPath,
            Self::Array { .. } => ArgType::Array,
            Self::Variant(_) => ArgType::Variant,
        }
    }

    #[must_use]
    pub fn signature(&self) -> Signature {
        match self {
            Self::Array { element, .. } => Signature::array_of(element),
            other => Signature::of(other.arg_type()),
        }
    }

    /// String payload, only for `Arg::String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a string argument.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from constructing messages or their bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("cannot reply to a {0} message")]
    NotAMethodCall(MessageKind),
    #[error("argument of type {found} does not fit container expecting {expected}")]
    SignatureMismatch { expected: Signature, found: Signature },
    #[error("variant must hold exactly one value, got {0}")]
    VariantArity(usize),
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A bus message as seen by the dispatch layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: MessageKind,
    serial: u32,
    reply_serial: Option<u32>,
    path: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    destination: Option<String>,
    sender: Option<String>,
    no_reply: bool,
    args: Vec<Arg>,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: 0,
            reply_serial: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            destination: None,
            sender: None,
            no_reply: false,
            args: Vec::new(),
        }
    }

    /// Creates a method call addressed to `destination`.
    #[must_use]
    pub fn method_call(destination: &str, path: &str, interface: &str, member: &str) -> Self {
        Self {
            destination: Some(destination.to_string()),
            path: Some(path.to_string()),
            interface: Some(interface.to_string()),
            member: Some(member.to_string()),
            ..Self::empty(MessageKind::MethodCall)
        }
    }

    /// Creates a broadcast signal.
    #[must_use]
    pub fn signal(path: &str, interface: &str, member: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            interface: Some(interface.to_string()),
            member: Some(member.to_string()),
            ..Self::empty(MessageKind::Signal)
        }
    }

    /// Creates the successful reply to `call`.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::NotAMethodCall` if `call` is not a method call.
    pub fn method_return(call: &Message) -> Result<Self, MessageError> {
        if call.kind != MessageKind::MethodCall {
            return Err(MessageError::NotAMethodCall(call.kind));
        }
        Ok(Self {
            reply_serial: Some(call.serial),
            destination: call.sender.clone(),
            ..Self::empty(MessageKind::MethodReturn)
        })
    }

    /// Creates an error reply to `call` carrying `text` as its only argument.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::NotAMethodCall` if `call` is not a method call.
    pub fn error_reply(call: &Message, name: &str, text: &str) -> Result<Self, MessageError> {
        if call.kind != MessageKind::MethodCall {
            return Err(MessageError::NotAMethodCall(call.kind));
        }
        Ok(Self {
            reply_serial: Some(call.serial),
            destination: call.sender.clone(),
            error_name: Some(name.to_string()),
            args: vec![Arg::string(text)],
            ..Self::empty(MessageKind::Error)
        })
    }

    /// Creates a standalone error message, e.g. one delivered by the bus for
    /// an asynchronous call.
    #[must_use]
    pub fn error(name: &str, reply_serial: u32, text: &str) -> Self {
        Self {
            reply_serial: Some(reply_serial),
            error_name: Some(name.to_string()),
            args: vec![Arg::string(text)],
            ..Self::empty(MessageKind::Error)
        }
    }

    /// The bus daemon's `NameOwnerChanged(name, old_owner, new_owner)` signal.
    #[must_use]
    pub fn name_owner_changed(name: &str, old_owner: &str, new_owner: &str) -> Self {
        Self::signal(names::DBUS_PATH, names::DBUS_INTERFACE, names::NAME_OWNER_CHANGED)
            .with_arg(Arg::string(name))
            .with_arg(Arg::string(old_owner))
            .with_arg(Arg::string(new_owner))
    }

    /// Appends an argument, builder style.
    #[must_use]
    pub fn with_arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Appends all arguments, builder style.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.args.extend(args);
        self
    }

    /// Sets the sender's unique name, builder style.
    #[must_use]
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    /// Sets the serial, builder style.
    #[must_use]
    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    /// Scoped writer appending to this message's body.
    pub fn writer(&mut self) -> ArgWriter<'_> {
        ArgWriter {
            args: &mut self.args,
        }
    }

    pub fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    pub fn set_no_reply(&mut self, no_reply: bool) {
        self.no_reply = no_reply;
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    #[must_use]
    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    #[must_use]
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    #[must_use]
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Whether the caller asked not to receive a reply.
    #[must_use]
    pub fn no_reply(&self) -> bool {
        self.no_reply
    }

    #[must_use]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    /// Method call with this member and, when given, this interface.
    #[must_use]
    pub fn is_method_call(&self, interface: Option<&str>, member: &str) -> bool {
        self.kind == MessageKind::MethodCall && self.routes_to(interface, member)
    }

    /// Signal with this member and, when given, this interface.
    #[must_use]
    pub fn is_signal(&self, interface: Option<&str>, member: &str) -> bool {
        self.kind == MessageKind::Signal && self.routes_to(interface, member)
    }

    /// Error message with this error name.
    #[must_use]
    pub fn is_error(&self, name: &str) -> bool {
        self.kind == MessageKind::Error && self.error_name.as_deref() == Some(name)
    }

    fn routes_to(&self, interface: Option<&str>, member: &str) -> bool {
        interface.map_or(true, |iface| self.interface.as_deref() == Some(iface))
            && self.member.as_deref() == Some(member)
    }
}

// ---------------------------------------------------------------------------
// Scoped body construction
// ---------------------------------------------------------------------------

/// Appends arguments to a message body.
pub struct ArgWriter<'a> {
    args: &'a mut Vec<Arg>,
}

impl<'a> ArgWriter<'a> {
    /// Writer over a bare argument list (e.g. a scratch buffer).
    pub fn new(args: &'a mut Vec<Arg>) -> Self {
        Self { args }
    }

    /// Appends a complete argument.
    pub fn append(&mut self, arg: Arg) {
        self.args.push(arg);
    }

    /// Opens a variant that will hold one value of `content` signature.
    pub fn open_variant(&mut self, content: Signature) -> Container<'_> {
        Container::new(self.args, ContainerKind::Variant(content))
    }

    /// Opens an array of `element` typed items.
    pub fn open_array(&mut self, element: Signature) -> Container<'_> {
        Container::new(self.args, ContainerKind::Array(element))
    }
}

#[derive(Debug)]
enum ContainerKind {
    Variant(Signature),
    Array(Signature),
}

/// An open variant or array.
///
/// Contents are staged until [`Container::close`]; dropping the container
/// without closing it discards everything staged so far.
pub struct Container<'a> {
    parent: &'a mut Vec<Arg>,
    kind: ContainerKind,
    staged: Vec<Arg>,
    closed: bool,
}

impl<'a> Container<'a> {
    fn new(parent: &'a mut Vec<Arg>, kind: ContainerKind) -> Self {
        Self {
            parent,
            kind,
            staged: Vec::new(),
            closed: false,
        }
    }

    /// Signature each staged item must have.
    fn expected(&self) -> &Signature {
        match &self.kind {
            ContainerKind::Variant(sig) | ContainerKind::Array(sig) => sig,
        }
    }

    fn check(&self, found: Signature) -> Result<(), MessageError> {
        if let ContainerKind::Variant(_) = self.kind {
            if !self.staged.is_empty() {
                return Err(MessageError::VariantArity(self.staged.len() + 1));
            }
        }
        if &found == self.expected() {
            Ok(())
        } else {
            Err(MessageError::SignatureMismatch {
                expected: self.expected().clone(),
                found,
            })
        }
    }

    /// Appends a complete argument.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::SignatureMismatch` if the argument's type is not
    /// the one this container holds, or `VariantArity` for a second value in
    /// a variant.
    pub fn append(&mut self, arg: Arg) -> Result<(), MessageError> {
        self.check(arg.signature())?;
        self.staged.push(arg);
        Ok(())
    }

    /// Opens a nested array inside this container.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Container::append`] for an array of `element`.
    pub fn open_array(&mut self, element: Signature) -> Result<Container<'_>, MessageError> {
        self.check(Signature::array_of(&element))?;
        Ok(Container::new(&mut self.staged, ContainerKind::Array(element)))
    }

    /// Number of items staged so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Completes the container and appends it to its parent.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::VariantArity` when closing an empty variant;
    /// the container is abandoned in that case.
    pub fn close(mut self) -> Result<(), MessageError> {
        let staged = std::mem::take(&mut self.staged);
        let arg = match &self.kind {
            ContainerKind::Variant(_) => {
                let mut staged = staged;
                if staged.len() != 1 {
                    return Err(MessageError::VariantArity(staged.len()));
                }
                Arg::Variant(Box::new(staged.remove(0)))
            }
            ContainerKind::Array(element) => Arg::Array {
                element: element.clone(),
                items: staged,
            },
        };
        self.parent.push(arg);
        self.closed = true;
        Ok(())
    }
}

impl Drop for Container<'_> {
    fn drop(&mut self) {
        if !self.closed {
            trace!(
                container = ?self.kind,
                staged = self.staged.len(),
                "abandoning unclosed container"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
