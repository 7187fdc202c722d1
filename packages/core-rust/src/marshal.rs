//! Conversion between [`ConfigValue`] and message arguments.
//!
//! On the wire a configuration value always travels inside a variant: a
//! scalar as the variant's single value, a list as an array of the element's
//! scalar type. The variant signature is derived from the declared kind
//! before any element is visited, so an empty list still carries the right
//! element type.
//!
//! Decoding accepts the variant form and, for arrays only, a bare array
//! argument. Arrays are read permissively: elements are consumed while they
//! have the declared element type and the first mismatch ends the list.

use thiserror::Error;
use tracing::trace;

use crate::message::{Arg, ArgType, ArgWriter, MessageError, Signature};
use crate::types::{ConfigValue, ElemKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from encoding a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A list element does not have the list's declared kind.
    #[error("list element {index} is {found}, expected {expected}")]
    MixedList {
        index: usize,
        expected: ElemKind,
        found: &'static str,
    },
    #[error(transparent)]
    Container(#[from] MessageError),
}

/// Errors from decoding a received value argument.
///
/// The display text is what request handlers send back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Neither a variant nor a bare array.
    #[error("expected variant")]
    ExpectedVariant(ArgType),
    /// A variant holding a type that is not a configuration value.
    #[error("unexpected value type")]
    UnexpectedType(ArgType),
    /// An array whose element type is not a configuration scalar.
    #[error("unexpected value array type")]
    UnexpectedArrayType(Signature),
}

// ---------------------------------------------------------------------------
// Type mapping
// ---------------------------------------------------------------------------

/// Wire type used for list elements of `kind`.
#[must_use]
pub fn elem_arg_type(kind: ElemKind) -> ArgType {
    match kind {
        ElemKind::String => ArgType::String,
        ElemKind::Int => ArgType::Int32,
        ElemKind::Float => ArgType::Double,
        ElemKind::Bool => ArgType::Boolean,
    }
}

fn elem_kind_of(ty: ArgType) -> Option<ElemKind> {
    match ty {
        ArgType::String => Some(ElemKind::String),
        ArgType::Int32 => Some(ElemKind::Int),
        ArgType::Double => Some(ElemKind::Float),
        ArgType::Boolean => Some(ElemKind::Bool),
        _ => None,
    }
}

/// Signature of the variant content for `value`.
#[must_use]
pub fn value_signature(value: &ConfigValue) -> Signature {
    match value {
        ConfigValue::List(kind, _) => Signature::array_of(&Signature::of(elem_arg_type(*kind))),
        ConfigValue::String(_) => Signature::of(ArgType::String),
        ConfigValue::Int(_) => Signature::of(ArgType::Int32),
        ConfigValue::Float(_) => Signature::of(ArgType::Double),
        ConfigValue::Bool(_) => Signature::of(ArgType::Boolean),
    }
}

fn scalar_arg(value: &ConfigValue) -> Option<Arg> {
    match value {
        ConfigValue::String(s) => Some(Arg::String(s.clone())),
        ConfigValue::Int(n) => Some(Arg::Int32(*n)),
        ConfigValue::Float(f) => Some(Arg::Double(*f)),
        ConfigValue::Bool(b) => Some(Arg::Boolean(*b)),
        ConfigValue::List(..) => None,
    }
}

fn scalar_value(arg: &Arg) -> Option<ConfigValue> {
    match arg {
        Arg::String(s) => Some(ConfigValue::String(s.clone())),
        Arg::Int32(n) => Some(ConfigValue::Int(*n)),
        Arg::Double(f) => Some(ConfigValue::Float(*f)),
        Arg::Boolean(b) => Some(ConfigValue::Bool(*b)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Appends `value` to a message body as a variant.
///
/// On error nothing is appended: the open variant and array are abandoned.
///
/// # Errors
///
/// Returns `EncodeError::MixedList` for a list element of the wrong kind.
pub fn append_value(writer: &mut ArgWriter<'_>, value: &ConfigValue) -> Result<(), EncodeError> {
    let mut variant = writer.open_variant(value_signature(value));

    match value {
        ConfigValue::List(kind, items) => {
            let mut array = variant.open_array(Signature::of(elem_arg_type(*kind)))?;
            for (index, item) in items.iter().enumerate() {
                let arg = scalar_arg(item)
                    .filter(|_| item.scalar_kind() == Some(*kind))
                    .ok_or(EncodeError::MixedList {
                        index,
                        expected: *kind,
                        found: item.kind_name(),
                    })?;
                array.append(arg)?;
            }
            array.close()?;
        }
        scalar => {
            if let Some(arg) = scalar_arg(scalar) {
                variant.append(arg)?;
            }
        }
    }

    variant.close()?;
    Ok(())
}

/// Encodes `value` as a standalone variant argument.
///
/// # Errors
///
/// Same as [`append_value`].
pub fn encode(value: &ConfigValue) -> Result<Arg, EncodeError> {
    let mut scratch = Vec::with_capacity(1);
    append_value(&mut ArgWriter::new(&mut scratch), value)?;
    scratch
        .pop()
        .ok_or(EncodeError::Container(MessageError::VariantArity(0)))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes a received value argument.
///
/// Accepts a variant holding a scalar or an array, or a bare array.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing what was wrong with the argument.
pub fn decode(arg: &Arg) -> Result<ConfigValue, DecodeError> {
    match arg {
        Arg::Variant(inner) => decode_content(inner),
        Arg::Array { .. } => decode_content(arg),
        other => Err(DecodeError::ExpectedVariant(other.arg_type())),
    }
}

fn decode_content(arg: &Arg) -> Result<ConfigValue, DecodeError> {
    if let Some(value) = scalar_value(arg) {
        return Ok(value);
    }
    match arg {
        Arg::Array { element, .. } => {
            let kind = element_kind(element)?;
            Ok(ConfigValue::List(kind, decode_array(arg)?))
        }
        other => Err(DecodeError::UnexpectedType(other.arg_type())),
    }
}

fn element_kind(element: &Signature) -> Result<ElemKind, DecodeError> {
    element
        .arg_type()
        .filter(|_| element.as_str().len() == 1)
        .and_then(elem_kind_of)
        .ok_or_else(|| DecodeError::UnexpectedArrayType(element.clone()))
}

/// Decodes the leading run of elements of an array that have the array's
/// declared scalar type.
///
/// # Errors
///
/// Returns `DecodeError::UnexpectedArrayType` when the element type is not a
/// configuration scalar and `UnexpectedType` when `arg` is not an array.
pub fn decode_array(arg: &Arg) -> Result<Vec<ConfigValue>, DecodeError> {
    let Arg::Array { element, items } = arg else {
        return Err(DecodeError::UnexpectedType(arg.arg_type()));
    };
    let kind = element_kind(element)?;
    let wanted = elem_arg_type(kind);

    let values = items
        .iter()
        .take_while(|item| item.arg_type() == wanted)
        .filter_map(scalar_value)
        .enumerate()
        .map(|(index, value)| {
            trace!(index, ?value, "array element");
            value
        })
        .collect::<Vec<_>>();

    if values.len() < items.len() {
        trace!(
            kept = values.len(),
            total = items.len(),
            "array element type changed, rest ignored"
        );
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::message::Message;

    fn int_sig() -> Signature {
        Signature::of(ArgType::Int32)
    }

    #[test]
    fn scalar_encodes_as_variant() {
        assert_eq!(
            encode(&ConfigValue::Int(42)).unwrap(),
            Arg::Variant(Box::new(Arg::Int32(42)))
        );
        assert_eq!(
            encode(&ConfigValue::from("on")).unwrap(),
            Arg::Variant(Box::new(Arg::string("on")))
        );
    }

    #[test]
    fn empty_list_keeps_element_signature() {
        for (value, sig) in [
            (ConfigValue::string_list(Vec::<String>::new()), "as"),
            (ConfigValue::int_list([]), "ai"),
            (ConfigValue::float_list([]), "ad"),
            (ConfigValue::bool_list([]), "ab"),
        ] {
            let Arg::Variant(inner) = encode(&value).unwrap() else {
                panic!("not a variant");
            };
            assert_eq!(inner.signature().as_str(), sig);
            assert_eq!(decode(&Arg::Variant(inner)).unwrap(), value);
        }
    }

    #[test]
    fn mixed_list_is_rejected_and_abandoned() {
        let mut msg = Message::signal("/", "com.example", "Changed").with_arg(Arg::string("k"));
        let bad = ConfigValue::List(
            ElemKind::Int,
            vec![ConfigValue::Int(1), ConfigValue::Bool(true)],
        );
        let err = append_value(&mut msg.writer(), &bad).unwrap_err();
        assert_eq!(
            err,
            EncodeError::MixedList {
                index: 1,
                expected: ElemKind::Int,
                found: "bool",
            }
        );
        assert_eq!(msg.args(), &[Arg::string("k")]);
    }

    #[test]
    fn nested_list_is_rejected() {
        let nested = ConfigValue::List(ElemKind::Int, vec![ConfigValue::int_list([1])]);
        assert!(matches!(
            encode(&nested),
            Err(EncodeError::MixedList { index: 0, .. })
        ));
    }

    #[test]
    fn bare_array_is_accepted() {
        let bare = Arg::Array {
            element: int_sig(),
            items: vec![Arg::Int32(1), Arg::Int32(2), Arg::Int32(3)],
        };
        assert_eq!(decode(&bare).unwrap(), ConfigValue::int_list([1, 2, 3]));
    }

    #[test]
    fn bare_scalar_is_rejected() {
        assert_eq!(
            decode(&Arg::Int32(1)),
            Err(DecodeError::ExpectedVariant(ArgType::Int32))
        );
        assert_eq!(
            decode(&Arg::Int32(1)).unwrap_err().to_string(),
            "expected variant"
        );
    }

    #[test]
    fn unsupported_content_is_rejected() {
        let uint = Arg::Variant(Box::new(Arg::UInt32(1)));
        assert_eq!(decode(&uint), Err(DecodeError::UnexpectedType(ArgType::UInt32)));
        assert_eq!(decode(&uint).unwrap_err().to_string(), "unexpected value type");

        let arr = Arg::Array {
            element: Signature::of(ArgType::Int64),
            items: vec![Arg::Int64(1)],
        };
        assert_eq!(
            decode(&Arg::Variant(Box::new(arr))).unwrap_err().to_string(),
            "unexpected value array type"
        );

        let nested = Arg::Array {
            element: Signature::array_of(&int_sig()),
            items: vec![],
        };
        assert!(matches!(
            decode(&nested),
            Err(DecodeError::UnexpectedArrayType(_))
        ));
    }

    #[test]
    fn decoding_stops_at_first_foreign_element() {
        let arr = Arg::Array {
            element: int_sig(),
            items: vec![Arg::Int32(1), Arg::Int32(2), Arg::string("x"), Arg::Int32(4)],
        };
        assert_eq!(
            decode_array(&arr).unwrap(),
            vec![ConfigValue::Int(1), ConfigValue::Int(2)]
        );
    }

    fn scalar_strategy() -> impl Strategy<Value = ConfigValue> {
        prop_oneof![
            ".*".prop_map(ConfigValue::String),
            any::<i32>().prop_map(ConfigValue::Int),
            (-1.0e12f64..1.0e12).prop_map(ConfigValue::Float),
            any::<bool>().prop_map(ConfigValue::Bool),
        ]
    }

    fn list_strategy() -> impl Strategy<Value = ConfigValue> {
        prop_oneof![
            prop::collection::vec(".*", 0..8).prop_map(ConfigValue::string_list),
            prop::collection::vec(any::<i32>(), 0..8).prop_map(ConfigValue::int_list),
            prop::collection::vec(-1.0e12f64..1.0e12, 0..8).prop_map(ConfigValue::float_list),
            prop::collection::vec(any::<bool>(), 0..8).prop_map(ConfigValue::bool_list),
        ]
    }

    proptest! {
        #[test]
        fn scalar_round_trip(value in scalar_strategy()) {
            let arg = encode(&value).unwrap();
            prop_assert_eq!(decode(&arg).unwrap(), value);
        }

        #[test]
        fn list_round_trip(value in list_strategy()) {
            let arg = encode(&value).unwrap();
            prop_assert_eq!(&decode(&arg).unwrap(), &value);

            let Arg::Variant(inner) = arg else {
                return Err(TestCaseError::fail("not a variant"));
            };
            let decoded = decode_array(&inner).unwrap();
            prop_assert_eq!(decoded.as_slice(), value.as_list().unwrap());
        }
    }
}
