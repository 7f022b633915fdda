//! Call and response envelopes, and the transport-level bodies that carry them.
//!
//! ```text
//! call:      { args: [Value, ...] }
//! response:  { response?: Value, exception?: string, listenerContent?: Value }
//! http body: { "json": "<codec output>" }
//! frame:     { "event": "<name>", "payload": "<codec output>" }
//! ```

use crate::error::{BridgeError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ARGS_KEY: &str = "args";
const RESPONSE_KEY: &str = "response";
const EXCEPTION_KEY: &str = "exception";
const LISTENER_CONTENT_KEY: &str = "listenerContent";

fn expect_map(value: Value, what: &str) -> Result<BTreeMap<String, Value>> {
    match value {
        Value::Map(fields) => Ok(fields),
        other => Err(BridgeError::serialization(format!(
            "{} must be a map, found {}",
            what,
            other.kind()
        ))),
    }
}

/// Serialized argument list for one invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallEnvelope {
    pub args: Vec<Value>,
}

impl CallEnvelope {
    pub fn new(args: Vec<Value>) -> Self {
        Self { args }
    }

    pub fn into_value(self) -> Value {
        Value::map([(ARGS_KEY, Value::List(self.args))])
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = expect_map(value, "call envelope")?;
        match fields.remove(ARGS_KEY) {
            Some(Value::List(args)) => Ok(Self { args }),
            Some(other) => Err(BridgeError::serialization(format!(
                "call envelope args must be a list, found {}",
                other.kind()
            ))),
            None => Err(BridgeError::serialization("call envelope is missing args")),
        }
    }
}

/// Outcome of one call as produced by a responder.
///
/// At most one of `response` / `exception` is set; the constructors are the
/// only way to build one. `listener_content` is independent of both.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseEnvelope {
    response: Option<Value>,
    exception: Option<String>,
    listener_content: Option<Value>,
}

impl ResponseEnvelope {
    pub fn success(response: Value) -> Self {
        Self {
            response: Some(response),
            ..Default::default()
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            exception: Some(message.into()),
            ..Default::default()
        }
    }

    /// Envelope carrying only push content, used on the duplex channel.
    pub fn listener_only(content: Value) -> Self {
        Self {
            listener_content: Some(content),
            ..Default::default()
        }
    }

    pub fn with_listener_content(mut self, content: Option<Value>) -> Self {
        self.listener_content = content;
        self
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub fn exception_message(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn listener_content(&self) -> Option<&Value> {
        self.listener_content.as_ref()
    }

    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Split into the call outcome and the push content.
    ///
    /// A missing response is reported as `Value::Null`.
    pub fn into_parts(self) -> (std::result::Result<Value, String>, Option<Value>) {
        let outcome = match self.exception {
            Some(message) => Err(message),
            None => Ok(self.response.unwrap_or_default()),
        };
        (outcome, self.listener_content)
    }

    pub fn into_value(self) -> Value {
        let mut fields = BTreeMap::new();
        if let Some(response) = self.response {
            fields.insert(RESPONSE_KEY.to_string(), response);
        }
        if let Some(exception) = self.exception {
            fields.insert(EXCEPTION_KEY.to_string(), Value::Str(exception));
        }
        if let Some(content) = self.listener_content {
            fields.insert(LISTENER_CONTENT_KEY.to_string(), content);
        }
        Value::Map(fields)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = expect_map(value, "response envelope")?;
        let response = fields.remove(RESPONSE_KEY);
        let exception = match fields.remove(EXCEPTION_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Str(message)) => Some(message),
            Some(other) => {
                return Err(BridgeError::serialization(format!(
                    "exception must be a string, found {}",
                    other.kind()
                )))
            }
        };
        if response.is_some() && exception.is_some() {
            return Err(BridgeError::serialization(
                "response envelope carries both response and exception",
            ));
        }
        Ok(Self {
            response,
            exception,
            listener_content: fields.remove(LISTENER_CONTENT_KEY),
        })
    }
}

/// Body of every request/response exchange, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireBody {
    pub json: String,
}

impl WireBody {
    pub fn new(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }
}

/// One message on the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    pub payload: String,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_envelope_shape() {
        let value = CallEnvelope::new(vec![Value::Int(1), Value::from("a")]).into_value();
        assert_eq!(
            value,
            Value::map([("args", Value::List(vec![Value::Int(1), Value::from("a")]))])
        );
        let parsed = CallEnvelope::from_value(value).unwrap();
        assert_eq!(parsed.args.len(), 2);
    }

    #[test]
    fn test_call_envelope_requires_args_list() {
        assert!(CallEnvelope::from_value(Value::map([("args", Value::Int(1))])).is_err());
        assert!(CallEnvelope::from_value(Value::map::<&str, _>([])).is_err());
        assert!(CallEnvelope::from_value(Value::Null).is_err());
    }

    #[test]
    fn test_exception_envelope_has_no_response() {
        let env = ResponseEnvelope::exception("boom");
        assert!(env.is_exception());
        assert!(env.response().is_none());
        let value = env.into_value();
        assert_eq!(value, Value::map([("exception", Value::from("boom"))]));
    }

    #[test]
    fn test_both_response_and_exception_rejected() {
        let value = Value::map([
            ("response", Value::Int(1)),
            ("exception", Value::from("boom")),
        ]);
        assert!(ResponseEnvelope::from_value(value).is_err());
    }

    #[test]
    fn test_listener_content_is_independent() {
        let env = ResponseEnvelope::exception("boom").with_listener_content(Some(Value::Int(9)));
        let parsed = ResponseEnvelope::from_value(env.into_value()).unwrap();
        let (outcome, content) = parsed.into_parts();
        assert_eq!(outcome, Err("boom".to_string()));
        assert_eq!(content, Some(Value::Int(9)));
    }

    #[test]
    fn test_missing_response_is_null() {
        let (outcome, content) = ResponseEnvelope::default().into_parts();
        assert_eq!(outcome, Ok(Value::Null));
        assert!(content.is_none());
    }

    #[test]
    fn test_wire_body_json_field() {
        let text = serde_json::to_string(&WireBody::new("{}")).unwrap();
        assert_eq!(text, r#"{"json":"{}"}"#);
    }

    #[test]
    fn test_frame_text_roundtrip() {
        let frame = ChannelFrame::new("calc.add", "payload");
        let parsed = ChannelFrame::from_text(&frame.to_text().unwrap()).unwrap();
        assert_eq!(parsed, frame);
    }
}
