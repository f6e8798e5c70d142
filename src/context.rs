//! Evaluation context and its OFREP wire encoding.
use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{ser, Serialize};
use serde_json::{Map, Number, Value};

use crate::schema::{EvaluationRequest, WireContext};

/// Reserved wire field that carries [`EvaluationContext::targeting_key`].
pub const TARGETING_KEY_FIELD: &str = "targetingKey";

/// Custom fields of an [`EvaluationContext`].
///
/// # Examples
/// ```
/// # use ofrep::{Fields, FieldValue};
/// let fields = [
///     ("age".to_owned(), 30.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Fields>();
/// ```
pub type Fields = HashMap<String, FieldValue>;

/// Context sent to the server along with every evaluation request.
///
/// ```
/// # use ofrep::EvaluationContext;
/// let context = EvaluationContext::new()
///     .with_targeting_key("user-42")
///     .with_field("plan", "pro")
///     .with_field("seats", 12);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationContext {
    /// Key used by the server to target the evaluated subject.
    pub targeting_key: Option<String>,
    /// Custom fields, sent as siblings of the targeting key.
    pub fields: Fields,
}

impl EvaluationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the targeting key.
    pub fn with_targeting_key(mut self, targeting_key: impl Into<String>) -> Self {
        self.targeting_key = Some(targeting_key.into());
        self
    }

    /// Add a custom field, replacing any previous value under the same key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Encode the context into its wire representation.
    ///
    /// Fails if an [`FieldValue::Object`] cannot be serialized or a [`FieldValue::Double`] is not
    /// finite. A custom field named `targetingKey` is dropped when a targeting key is set.
    pub fn to_wire(&self) -> Result<WireContext, ContextError> {
        // Sorted so the encoding does not depend on HashMap iteration order.
        let mut fields = self.fields.iter().collect::<Vec<_>>();
        fields.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        let mut additional_properties = Map::new();
        for (key, value) in fields {
            if key == TARGETING_KEY_FIELD && self.targeting_key.is_some() {
                log::debug!(target: "ofrep", field = key.as_str(); "ignoring custom field that shadows the targeting key");
                continue;
            }
            additional_properties.insert(key.clone(), value.to_json(key)?);
        }

        Ok(WireContext {
            targeting_key: self.targeting_key.clone(),
            additional_properties,
        })
    }
}

impl EvaluationRequest {
    /// Build the request body for an evaluation. A `None` context produces no `context` field.
    pub fn from_context(context: Option<&EvaluationContext>) -> Result<Self, ContextError> {
        Ok(EvaluationRequest {
            context: context.map(EvaluationContext::to_wire).transpose()?,
        })
    }
}

/// Value of a custom context field.
///
/// Conveniently implements `From` conversions for `bool`, `String`, `&str`, `i64`, `i32`, `f64`,
/// `DateTime<Utc>`, and `serde_json::Value`.
#[derive(Debug, Clone, PartialEq, From)]
pub enum FieldValue {
    /// A boolean value.
    Bool(bool),
    /// A string value.
    String(String),
    /// An integer value.
    Int(i64),
    /// A floating-point value. Must be finite.
    Double(f64),
    /// A point in time, sent as (possibly fractional) seconds since the Unix epoch.
    Timestamp(DateTime<Utc>),
    /// A structured value, flattened to plain JSON.
    Object(ObjectValue),
}

impl FieldValue {
    /// Wrap any serializable value as an object field.
    pub fn object<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self::Object(ObjectValue::new(value))
    }

    fn to_json(&self, field: &str) -> Result<Value, ContextError> {
        let value = match self {
            FieldValue::Bool(value) => Value::Bool(*value),
            FieldValue::String(value) => Value::String(value.clone()),
            FieldValue::Int(value) => Value::Number((*value).into()),
            FieldValue::Double(value) => Value::Number(finite(field, *value)?),
            FieldValue::Timestamp(value) => Value::Number(finite(field, seconds_since_epoch(value))?),
            FieldValue::Object(value) => {
                // serde_json writes NaN and infinities as `null`, so they are caught beforehand.
                if !value.0.is_finite() {
                    return Err(ContextError::NonFiniteNumber {
                        field: field.to_owned(),
                    });
                }
                value.to_json().map_err(|source| ContextError::Object {
                    field: field.to_owned(),
                    source: Arc::new(source),
                })?
            }
        };
        Ok(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::object(value)
    }
}

fn finite(field: &str, value: f64) -> Result<Number, ContextError> {
    Number::from_f64(value).ok_or_else(|| ContextError::NonFiniteNumber {
        field: field.to_owned(),
    })
}

fn seconds_since_epoch(timestamp: &DateTime<Utc>) -> f64 {
    timestamp.timestamp() as f64 + f64::from(timestamp.timestamp_subsec_nanos()) / 1e9
}

/// A type-erased serializable value stored in [`FieldValue::Object`].
///
/// The value is encoded lazily, when the context is sent, using its own [`Serialize`]
/// implementation.
#[derive(Clone)]
pub struct ObjectValue(Arc<dyn SerializeJson>);

impl ObjectValue {
    /// Wrap a serializable value.
    pub fn new<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Encode the wrapped value as a generic JSON value.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        self.0.to_json()
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(value) => f.debug_tuple("ObjectValue").field(&value).finish(),
            Err(_) => f.write_str("ObjectValue(<unserializable>)"),
        }
    }
}

impl PartialEq for ObjectValue {
    // Values are equal when they encode to the same JSON.
    fn eq(&self, other: &Self) -> bool {
        match (self.to_json(), other.to_json()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

trait SerializeJson: Send + Sync {
    fn to_json(&self) -> serde_json::Result<Value>;

    /// `false` if any floating-point number reachable from the value is NaN or infinite.
    fn is_finite(&self) -> bool;
}

impl<T: Serialize + Send + Sync> SerializeJson for T {
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn is_finite(&self) -> bool {
        !matches!(self.serialize(FiniteCheck), Err(Rejected::NonFinite))
    }
}

/// Serializer that produces nothing and only looks for non-finite floats.
struct FiniteCheck;

#[derive(thiserror::Error, Debug)]
enum Rejected {
    #[error("non-finite number")]
    NonFinite,
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for Rejected {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Rejected::Custom(msg.to_string())
    }
}

macro_rules! accept {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(fn $method(self, _: $ty) -> Result<(), Rejected> {
            Ok(())
        })*
    };
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = Rejected;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept! {
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    }

    fn serialize_f32(self, v: f32) -> Result<(), Rejected> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(Rejected::NonFinite)
        }
    }

    fn serialize_f64(self, v: f64) -> Result<(), Rejected> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(Rejected::NonFinite)
        }
    }

    fn serialize_none(self) -> Result<(), Rejected> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), Rejected> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Rejected> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), Rejected> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), Rejected> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), Rejected> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, Rejected> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, Rejected> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, Rejected> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, Rejected> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, Rejected> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, Rejected> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, Rejected> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Rejected> {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = Rejected;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Rejected> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), Rejected> {
        Ok(())
    }
}

/// Failure to encode an [`EvaluationContext`].
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum ContextError {
    /// An object field failed to serialize. Displays the serializer's own message.
    #[error("{source}")]
    Object {
        /// Name of the offending field.
        field: String,
        /// Serializer error.
        source: Arc<serde_json::Error>,
    },

    /// A floating-point field is NaN or infinite, which JSON cannot represent.
    #[error("field \"{field}\" holds a non-finite number")]
    NonFiniteNumber {
        /// Name of the offending field.
        field: String,
    },

    /// A field converted from an OpenFeature context holds a value with no JSON form (an
    /// out-of-range date or an unknown struct payload).
    #[error("field \"{field}\" holds a value that cannot be sent")]
    Unsupported {
        /// Name of the offending field.
        field: String,
    },
}
