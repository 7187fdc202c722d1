//! mcebus core: bus message model, configuration values, value marshaling and
//! signal match rules.

pub mod marshal;
pub mod message;
pub mod names;
pub mod rules;
pub mod types;

pub use marshal::{decode, encode, DecodeError, EncodeError};
pub use message::{Arg, ArgType, ArgWriter, Container, Message, MessageError, MessageKind, Signature};
pub use rules::{Rule, RuleError};
pub use types::{ConfigValue, ElemKind};
