//! Value serialization and positional heterogeneous tuple decoding.
//!
//! Replay needs to turn a stored argument payload back into a typed,
//! positional argument list whose element types differ per slot. The
//! [`Serializer`] trait stays object-safe by working at the
//! `serde_json::Value` level; the typed slot conversion lives in
//! [`ArgTuple`] and the [`decode_args`] helper.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Opaque value (de)serialization used for event arguments, cached view
/// layouts, and lease entries.
///
/// Implementations are injected at repository construction; there is no
/// ambient default instance.
pub trait Serializer: Send + Sync {
    /// Encode a value into its wire string.
    fn encode(&self, value: &Value) -> Result<String>;

    /// Decode a wire string back into a value.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPayload`] if the input is structurally invalid.
    fn decode(&self, raw: &str) -> Result<Value>;

    /// Decode a wire string into a positional sequence of values.
    ///
    /// This is the multi-type entry point replay depends on: each element
    /// is converted to a different concrete type afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPayload`] if the input is invalid or not a
    /// positional array.
    fn decode_seq(&self, raw: &str) -> Result<Vec<Value>>;
}

/// The default JSON serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(Error::Serialization)
    }

    fn decode(&self, raw: &str) -> Result<Value> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    fn decode_seq(&self, raw: &str) -> Result<Vec<Value>> {
        match self.decode(raw)? {
            Value::Array(items) => Ok(items),
            other => Err(Error::MalformedPayload(format!(
                "expected a positional array, got {other}"
            ))),
        }
    }
}

/// A positional tuple of argument types, decodable slot by slot.
///
/// Implemented for tuples of arity 0 through 6. The tuple type is the
/// "ordered type list" of the operation's declared parameters; conversion
/// fails with [`Error::ArrayLengthMismatch`] when the element count
/// disagrees and [`Error::MalformedPayload`] when a slot's value does not
/// fit its declared type.
pub trait ArgTuple: Sized {
    /// Number of argument slots.
    const ARITY: usize;

    /// Convert a positional value array into the typed tuple.
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

impl ArgTuple for () {
    const ARITY: usize = 0;

    fn from_values(values: Vec<Value>) -> Result<Self> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(Error::ArrayLengthMismatch {
                expected: 0,
                actual: values.len(),
            })
        }
    }
}

macro_rules! impl_arg_tuple {
    ($($name:ident),+) => {
        impl<$($name: DeserializeOwned),*> ArgTuple for ($($name,)*) {
            const ARITY: usize = impl_arg_tuple!(@count $($name)*);

            fn from_values(values: Vec<Value>) -> Result<Self> {
                if values.len() != Self::ARITY {
                    return Err(Error::ArrayLengthMismatch {
                        expected: Self::ARITY,
                        actual: values.len(),
                    });
                }
                let mut slots = values.into_iter();
                Ok(($(
                    serde_json::from_value::<$name>(
                        slots.next().ok_or_else(|| Error::MalformedPayload(
                            "argument slot missing".to_string(),
                        ))?,
                    )
                    .map_err(|e| Error::MalformedPayload(e.to_string()))?,
                )*))
            }
        }
    };
    (@count $head:ident) => { 1 };
    (@count $head:ident $($tail:ident)+) => { 1 + impl_arg_tuple!(@count $($tail)+) };
}

impl_arg_tuple!(A);
impl_arg_tuple!(A, B);
impl_arg_tuple!(A, B, C);
impl_arg_tuple!(A, B, C, D);
impl_arg_tuple!(A, B, C, D, E);
impl_arg_tuple!(A, B, C, D, E, F);

/// Decode a serialized payload into a typed positional tuple.
pub fn decode_args<T: ArgTuple>(serializer: &dyn Serializer, raw: &str) -> Result<T> {
    T::from_values(serializer.decode_seq(raw)?)
}

/// Convert an argument tuple into its positional array value.
///
/// The unit tuple serializes to JSON `null`, which is normalized to an
/// empty array so zero-argument operations still store a positional shape.
pub fn arguments_value<T: Serialize>(args: &T) -> Result<Value> {
    match serde_json::to_value(args)? {
        Value::Array(items) => Ok(Value::Array(items)),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(Error::InvalidArgument(format!(
            "arguments must serialize to a positional array, got {other}"
        ))),
    }
}

/// Encode an argument tuple into the wire string stored on an event.
pub fn encode_args<T: Serialize>(serializer: &dyn Serializer, args: &T) -> Result<String> {
    serializer.encode(&arguments_value(args)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_heterogeneous_tuple() {
        let serializer = JsonSerializer;
        let (count, name, enabled): (i64, String, bool) =
            decode_args(&serializer, r#"[1986, "bob", true]"#).expect("decode should succeed");
        assert_eq!(count, 1986);
        assert_eq!(name, "bob");
        assert!(enabled);
    }

    #[test]
    fn decode_empty_tuple() {
        let serializer = JsonSerializer;
        decode_args::<()>(&serializer, "[]").expect("decode should succeed");
    }

    #[test]
    fn length_disagreement_is_array_length_mismatch() {
        let serializer = JsonSerializer;
        let err = decode_args::<(i64, String)>(&serializer, "[1]").expect_err("should fail");
        assert!(
            matches!(err, Error::ArrayLengthMismatch { expected: 2, actual: 1 }),
            "got: {err}"
        );
    }

    #[test]
    fn slot_type_disagreement_is_malformed_payload() {
        let serializer = JsonSerializer;
        let err = decode_args::<(i64,)>(&serializer, r#"["not a number"]"#).expect_err("should fail");
        assert!(matches!(err, Error::MalformedPayload(_)), "got: {err}");
    }

    #[test]
    fn invalid_json_is_malformed_payload() {
        let serializer = JsonSerializer;
        let err = decode_args::<(i64,)>(&serializer, "[1986").expect_err("should fail");
        assert!(matches!(err, Error::MalformedPayload(_)), "got: {err}");
    }

    #[test]
    fn non_array_payload_is_malformed_payload() {
        let serializer = JsonSerializer;
        let err = serializer.decode_seq(r#"{"a": 1}"#).expect_err("should fail");
        assert!(matches!(err, Error::MalformedPayload(_)), "got: {err}");
    }

    #[test]
    fn encode_args_produces_positional_array() {
        let serializer = JsonSerializer;
        let raw = encode_args(&serializer, &(1986,)).expect("encode should succeed");
        assert_eq!(raw, "[1986]");
    }

    #[test]
    fn encode_args_normalizes_unit_to_empty_array() {
        let serializer = JsonSerializer;
        let raw = encode_args(&serializer, &()).expect("encode should succeed");
        assert_eq!(raw, "[]");
    }

    #[test]
    fn encode_args_rejects_non_positional_shape() {
        let serializer = JsonSerializer;
        let err = encode_args(&serializer, &42).expect_err("a bare scalar should be rejected");
        assert!(matches!(err, Error::InvalidArgument(_)), "got: {err}");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let serializer = JsonSerializer;
        let raw = encode_args(&serializer, &("alice".to_string(), 3_u32)).expect("encode");
        let (name, n): (String, u32) = decode_args(&serializer, &raw).expect("decode");
        assert_eq!(name, "alice");
        assert_eq!(n, 3);
    }
}
