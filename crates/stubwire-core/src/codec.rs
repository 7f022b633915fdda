//! Reversible encoding of values to the wire representation.
//!
//! The codec only accepts tagged objects whose type is present in the
//! caller-supplied [`TypeRegistry`], so both sides of a call agree on which
//! non-primitive values may cross the wire.

use crate::config::ProtocolConfig;
use crate::error::{BridgeError, Result};
use crate::value::{FromValue, Registered, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Reviver = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Mapping from type tag to a reviver able to reconstruct that type.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    revivers: HashMap<String, Reviver>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` and return the registry, for chained construction.
    pub fn with<T>(mut self) -> Self
    where
        T: Registered + FromValue + 'static,
    {
        self.register::<T>();
        self
    }

    /// Register `T` under its tag. Registering the same tag twice replaces the reviver.
    pub fn register<T>(&mut self)
    where
        T: Registered + FromValue + 'static,
    {
        let reviver: Reviver = Arc::new(|value: &Value| T::from_value(value.clone()).map(|_| ()));
        self.revivers.insert(T::TAG.to_string(), reviver);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.revivers.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.revivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revivers.is_empty()
    }

    /// Check that a tagged object can be reconstructed as its registered type.
    fn revive(&self, tag: &str, value: &Value) -> Result<()> {
        let reviver = self.revivers.get(tag).ok_or_else(|| {
            BridgeError::serialization(format!("type tag {:?} is not registered", tag))
        })?;
        reviver(value)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.revivers.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}

/// Encodes and decodes values given a type registry.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: &Value, registry: &TypeRegistry) -> Result<String>;

    fn decode(&self, wire: &str, registry: &TypeRegistry) -> Result<Value>;
}

/// JSON codec. The default for every bridge and router.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn check(value: &Value, registry: &TypeRegistry) -> Result<()> {
        match value {
            Value::Float(f) if !f.is_finite() => Err(BridgeError::serialization(format!(
                "non-finite float {} cannot be encoded",
                f
            ))),
            Value::List(items) => items.iter().try_for_each(|v| Self::check(v, registry)),
            Value::Map(fields) => fields.values().try_for_each(|v| Self::check(v, registry)),
            Value::Object { tag, fields } => {
                registry.revive(tag, value)?;
                fields.values().try_for_each(|v| Self::check(v, registry))
            }
            _ => Ok(()),
        }
    }
}

impl Codec for JsonCodec {
    fn encode(&self, value: &Value, registry: &TypeRegistry) -> Result<String> {
        Self::check(value, registry)?;
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, wire: &str, registry: &TypeRegistry) -> Result<Value> {
        if wire.len() > ProtocolConfig::MAX_MESSAGE_SIZE {
            return Err(BridgeError::serialization(format!(
                "message size {} exceeds maximum {}",
                wire.len(),
                ProtocolConfig::MAX_MESSAGE_SIZE
            )));
        }
        let value: Value = serde_json::from_str(wire)?;
        Self::check(&value, registry)?;
        Ok(value)
    }
}
