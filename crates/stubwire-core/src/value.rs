//! The closed value model carried by call and response envelopes.
//!
//! Arguments and return values cross the wire as [`Value`]. Plain Rust types
//! convert through [`IntoValue`] / [`FromValue`]. User structs opt in with
//! [`registered_type!`](crate::registered_type), which bridges their serde
//! implementation into a tagged [`Value::Object`].

use crate::error::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A serializable value.
///
/// The serde representation is adjacently tagged so integers and floats stay
/// distinct after a round trip through JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Instance of a registered type. `tag` must be present in the `TypeRegistry`.
    Object {
        tag: String,
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object { .. } => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Build a `Map` from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

// ============================================================================
// Conversion traits
// ============================================================================

/// Conversion of a Rust value into a wire [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Result<Value>;
}

/// Reconstruction of a Rust value from a wire [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &str, found: &Value) -> BridgeError {
    BridgeError::serialization(format!("expected {}, found {}", expected, found.kind()))
}

impl IntoValue for Value {
    fn into_value(self) -> Result<Value> {
        Ok(self)
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Null)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(()),
            other => Err(mismatch("null", &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Bool(self))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Result<Value> {
                    i64::try_from(self).map(Value::Int).map_err(|_| {
                        BridgeError::serialization(format!(
                            "integer {} does not fit in i64",
                            self
                        ))
                    })
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i).map_err(|_| {
                            BridgeError::serialization(format!(
                                "integer {} out of range for {}",
                                i,
                                stringify!($ty)
                            ))
                        }),
                        other => Err(mismatch("int", &other)),
                    }
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoValue for f64 {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Float(self))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Float(f64::from(self)))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Str(self))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Str(self.to_string()))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Result<Value> {
        match self {
            Some(v) => v.into_value(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Result<Value> {
        self.into_iter()
            .map(IntoValue::into_value)
            .collect::<Result<Vec<_>>>()
            .map(Value::List)
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self) -> Result<Value> {
        self.into_iter()
            .map(|(k, v)| v.into_value().map(|v| (k, v)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Value::Map)
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k, v)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for HashMap<String, T> {
    fn into_value(self) -> Result<Value> {
        self.into_iter().collect::<BTreeMap<_, _>>().into_value()
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: Value) -> Result<Self> {
        BTreeMap::<String, T>::from_value(value).map(|m| m.into_iter().collect())
    }
}

// ============================================================================
// Registered types
// ============================================================================

/// A user type that crosses the wire as a tagged [`Value::Object`].
///
/// Implement through [`registered_type!`](crate::registered_type) and add the
/// type to the `TypeRegistry` used on both sides of a call.
pub trait Registered: Serialize + DeserializeOwned {
    const TAG: &'static str;
}

/// Convert a registered type into a tagged object.
///
/// The type must serialize to a JSON object (a struct with named fields or a map).
pub fn to_object<T: Registered>(value: &T) -> Result<Value> {
    match from_json(serde_json::to_value(value)?)? {
        Value::Map(fields) => Ok(Value::Object {
            tag: T::TAG.to_string(),
            fields,
        }),
        other => Err(BridgeError::serialization(format!(
            "registered type {} must serialize to a map, got {}",
            T::TAG,
            other.kind()
        ))),
    }
}

/// Reconstruct a registered type from a tagged object.
pub fn from_object<T: Registered>(value: Value) -> Result<T> {
    match value {
        Value::Object { tag, fields } if tag == T::TAG => {
            let json = to_json(Value::Map(fields))?;
            Ok(serde_json::from_value(json)?)
        }
        Value::Object { tag, .. } => Err(BridgeError::serialization(format!(
            "expected object tagged {}, found {}",
            T::TAG,
            tag
        ))),
        other => Err(mismatch("object", &other)),
    }
}

// Integers outside i64 are rejected rather than widened to floats.
fn from_json(json: serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None if n.is_f64() => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            None => {
                return Err(BridgeError::serialization(format!(
                    "integer {} does not fit in i64",
                    n
                )))
            }
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| from_json(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        ),
    })
}

// Nested objects flatten to their fields; the outer serde type drives decoding.
fn to_json(value: Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Int(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| BridgeError::serialization(format!("non-finite float {}", f)))?,
        Value::Str(s) => serde_json::Value::String(s),
        Value::List(items) => serde_json::Value::Array(
            items.into_iter().map(to_json).collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(fields) | Value::Object { fields, .. } => serde_json::Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| to_json(v).map(|v| (k, v)))
                .collect::<Result<serde_json::Map<_, _>>>()?,
        ),
    })
}

/// Implement [`Registered`], [`IntoValue`] and [`FromValue`] for serde types.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Point { x: i64, y: i64 }
///
/// stubwire::registered_type!(Point => "Point");
/// ```
#[macro_export]
macro_rules! registered_type {
    ($($ty:ty => $tag:literal),+ $(,)?) => {
        $(
            impl $crate::Registered for $ty {
                const TAG: &'static str = $tag;
            }

            impl $crate::IntoValue for $ty {
                fn into_value(self) -> $crate::Result<$crate::Value> {
                    $crate::value::to_object(&self)
                }
            }

            impl $crate::FromValue for $ty {
                fn from_value(value: $crate::Value) -> $crate::Result<Self> {
                    $crate::value::from_object(value)
                }
            }
        )+
    };
}
