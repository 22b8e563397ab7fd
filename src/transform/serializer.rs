use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::ChangeRecord;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    #[default]
    Json,
    JsonPretty,
}

impl SerializationFormat {
    pub fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Turns record keys and values into bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordSerializer {
    format: SerializationFormat,
}

impl RecordSerializer {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// Serialized value, or `None` for a tombstone. An absent value never
    /// becomes a zero-length array.
    pub fn serialize_value(&self, record: &ChangeRecord) -> Result<Option<Bytes>> {
        record.value.as_ref().map(|value| self.encode(value)).transpose()
    }

    /// Serialized key, or an empty byte sequence when the record has none.
    pub fn serialize_key(&self, record: &ChangeRecord) -> Result<Bytes> {
        match &record.key {
            Some(key) => self.encode(key),
            None => Ok(Bytes::new()),
        }
    }

    fn encode(&self, value: &Value) -> Result<Bytes> {
        let encoded = match self.format {
            SerializationFormat::Json => serde_json::to_vec(value)?,
            SerializationFormat::JsonPretty => serde_json::to_vec_pretty(value)?,
        };
        Ok(Bytes::from(encoded))
    }
}
