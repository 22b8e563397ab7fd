use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::{json, Value};

/// Serialized record key, always present (empty when the record has none).
pub const CDC_KEY: &str = "cdc_key";
/// Source topic of the record.
pub const CDC_TOPIC: &str = "cdc_topic";
/// JSON-serialized source offset, when offset headers are enabled.
pub const CDC_OFFSET: &str = "cdc_offset";

pub fn is_reserved_header(name: &str) -> bool {
    matches!(name, CDC_KEY | CDC_TOPIC | CDC_OFFSET)
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            HeaderValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            HeaderValue::Text(text) => Value::String(text.clone()),
            HeaderValue::Bytes(bytes) => Value::String(STANDARD.encode(bytes)),
            HeaderValue::Json(value) => value.clone(),
        }
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

/// Outbound payload. A tombstone is a tagged variant of its own so it can
/// never be mistaken for legitimately empty content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Bytes),
    Tombstone { sentinel: Bytes },
}

/// A transformed change, ready for an adapter's messaging pipeline.
///
/// Built once from fully populated parts and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    payload: Payload,
    key: Bytes,
    content_type: String,
    headers: Headers,
}

impl OutboundEnvelope {
    pub fn new(payload: Payload, key: Bytes, content_type: String, headers: Headers) -> Self {
        Self {
            payload,
            key,
            content_type,
            headers,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The bytes to put on the wire: the serialized value, or the sentinel
    /// for a tombstone.
    pub fn body(&self) -> &Bytes {
        match &self.payload {
            Payload::Bytes(bytes) => bytes,
            Payload::Tombstone { sentinel } => sentinel,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, Payload::Tombstone { .. })
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn topic(&self) -> Option<&str> {
        self.header(CDC_TOPIC).and_then(HeaderValue::as_text)
    }

    /// JSON rendering for line-oriented output. Non UTF-8 bytes are base64
    /// encoded.
    pub fn to_json(&self) -> Value {
        let headers: serde_json::Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();

        json!({
            "key": text_or_base64(&self.key),
            "payload": text_or_base64(self.body()),
            "tombstone": self.is_tombstone(),
            "content_type": self.content_type,
            "headers": headers,
        })
    }
}

fn text_or_base64(bytes: &Bytes) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => json!({ "base64": STANDARD.encode(bytes) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_body_is_sentinel() {
        let envelope = OutboundEnvelope::new(
            Payload::Tombstone {
                sentinel: Bytes::from_static(b"null"),
            },
            Bytes::from_static(b"5"),
            "text/plain".to_string(),
            Headers::new(),
        );

        assert!(envelope.is_tombstone());
        assert_eq!(envelope.body().as_ref(), b"null");
    }

    #[test]
    fn test_empty_payload_is_not_a_tombstone() {
        let envelope = OutboundEnvelope::new(
            Payload::Bytes(Bytes::new()),
            Bytes::new(),
            "application/json".to_string(),
            Headers::new(),
        );

        assert!(!envelope.is_tombstone());
        assert!(envelope.body().is_empty());
    }

    #[test]
    fn test_to_json_encodes_binary_headers() {
        let mut headers = Headers::new();
        headers.insert(CDC_KEY.to_string(), HeaderValue::Bytes(Bytes::from_static(&[0xff])));
        headers.insert(CDC_TOPIC.to_string(), HeaderValue::Text("orders".to_string()));
        let envelope = OutboundEnvelope::new(
            Payload::Bytes(Bytes::from_static(b"{\"id\":1}")),
            Bytes::from_static(&[0xff]),
            "application/json".to_string(),
            headers,
        );

        let json = envelope.to_json();

        assert_eq!(json["payload"], "{\"id\":1}");
        assert_eq!(json["key"]["base64"], "/w==");
        assert_eq!(json["headers"]["cdc_key"], "/w==");
        assert_eq!(json["headers"]["cdc_topic"], "orders");
        assert_eq!(envelope.topic(), Some("orders"));
    }
}
