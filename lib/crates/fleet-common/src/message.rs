//! Messages and batches exchanged with the management server.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::codec::{self, CodecError, Value};

/// Well-known message keys.
pub mod keys {
    /// Mandatory handler selector.
    pub const TYPE: &str = "type";
    /// Server-assigned operation identifier (integer, optional).
    pub const OPERATION_ID: &str = "operation-id";
}

/// An ordered group of messages exchanged in one round trip.
pub type Batch = Vec<Message>;

/// A string-keyed mapping with a mandatory string `type` field.
///
/// Messages are immutable once built; handlers construct new ones for any
/// response.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    fields: BTreeMap<String, Value>,
}

impl Message {
    /// Start a message of the given type.
    #[must_use]
    pub fn new(message_type: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(keys::TYPE.to_string(), Value::Str(message_type.into()));
        Self { fields }
    }

    /// Builder-style field setter. Setting `type` replaces the message type.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Validate a decoded mapping as a message.
    pub fn from_map(fields: BTreeMap<String, Value>) -> Result<Self, CodecError> {
        match fields.get(keys::TYPE) {
            Some(Value::Str(_)) => {}
            Some(other) => {
                return Err(CodecError::Decode(format!(
                    "message type must be a string, got {}",
                    other.type_name()
                )));
            }
            None => return Err(CodecError::Decode("message has no type".to_string())),
        }
        match fields.get(keys::OPERATION_ID) {
            None | Some(Value::Int(_)) => {}
            Some(other) => {
                return Err(CodecError::Decode(format!(
                    "operation-id must be an integer, got {}",
                    other.type_name()
                )));
            }
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn message_type(&self) -> &str {
        self.fields
            .get(keys::TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn operation_id(&self) -> Option<i64> {
        self.fields.get(keys::OPERATION_ID).and_then(Value::as_int)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Read the message body as a typed structure.
    ///
    /// Unknown keys (including `type` and `operation-id`) are ignored unless
    /// the target type denies them.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::from_value(Value::Map(self.fields.clone()))
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(self.fields)
    }
}

/// Encode a batch as a sequence of mappings.
pub fn encode_batch(batch: &[Message]) -> Result<Vec<u8>, CodecError> {
    let value = Value::List(batch.iter().cloned().map(Message::into_value).collect());
    codec::encode(&value)
}

/// Decode a batch. Every element must be a valid message.
pub fn decode_batch(bytes: &[u8]) -> Result<Batch, CodecError> {
    match codec::decode(bytes)? {
        Value::List(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Map(fields) => Message::from_map(fields).map_err(|e| {
                    CodecError::Decode(format!("batch element {index}: {e}"))
                }),
                other => Err(CodecError::Decode(format!(
                    "batch element {index} is a {}, expected a mapping",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(CodecError::Decode(format!(
            "batch must be a sequence, got {}",
            other.type_name()
        ))),
    }
}
