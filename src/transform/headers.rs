use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::engine::ChangeRecord;
use crate::stream::envelope::{is_reserved_header, HeaderValue, Headers, CDC_OFFSET, CDC_TOPIC};

/// Copies record metadata onto the outbound header map.
#[derive(Debug, Clone, Copy)]
pub struct HeaderProjector {
    include_offset: bool,
    propagate_headers: bool,
}

impl HeaderProjector {
    pub fn new(include_offset: bool, propagate_headers: bool) -> Self {
        Self {
            include_offset,
            propagate_headers,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.include_offset, config.propagate_headers)
    }

    /// Always sets `cdc_topic` and the `added` headers; adds `cdc_offset` and
    /// connector headers when enabled. A failing enrichment is logged and left
    /// out.
    pub fn project(&self, record: &ChangeRecord, added: &[(String, Value)]) -> Headers {
        let mut headers = Headers::new();
        headers.insert(CDC_TOPIC.to_string(), HeaderValue::Text(record.topic.clone()));

        if self.include_offset && !record.offset.is_empty() {
            match serde_json::to_string(&record.offset) {
                Ok(offset) => {
                    headers.insert(CDC_OFFSET.to_string(), HeaderValue::Text(offset));
                }
                Err(e) => {
                    warn!(topic = %record.topic, error = %e, "Failed to serialize source offset, omitting header");
                }
            }
        }

        if self.propagate_headers {
            for (name, value) in &record.headers {
                if is_reserved_header(name) {
                    debug!(header = %name, "Skipping connector header with a reserved name");
                    continue;
                }
                headers.insert(name.clone(), HeaderValue::Json(value.clone()));
            }
        }

        for (name, value) in added {
            if is_reserved_header(name) {
                continue;
            }
            headers.insert(name.clone(), HeaderValue::Json(value.clone()));
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Operation, SourceOffset};
    use serde_json::json;

    fn record() -> ChangeRecord {
        ChangeRecord::new("dbserver1.inventory.orders", Operation::Create)
            .with_value(json!({"id": 10001}))
            .with_header("trace_id", json!("4bf92f35"))
            .with_header(CDC_TOPIC, json!("spoofed"))
            .with_offset(SourceOffset::new().with("lsn", 24023128).with("txId", 555))
    }

    #[test]
    fn test_topic_only_by_default() {
        let headers = HeaderProjector::new(false, false).project(&record(), &[]);

        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.get(CDC_TOPIC),
            Some(&HeaderValue::Text("dbserver1.inventory.orders".to_string()))
        );
    }

    #[test]
    fn test_offset_header() {
        let headers = HeaderProjector::new(true, false).project(&record(), &[]);

        let offset = headers.get(CDC_OFFSET).and_then(HeaderValue::as_text).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(offset).unwrap();
        assert_eq!(parsed, json!({"lsn": 24023128, "txId": 555}));
    }

    #[test]
    fn test_empty_offset_is_omitted() {
        let record = ChangeRecord::new("t", Operation::Create);

        let headers = HeaderProjector::new(true, true).project(&record, &[]);

        assert!(!headers.contains_key(CDC_OFFSET));
    }

    #[test]
    fn test_added_headers_ignore_propagation_toggle() {
        let added = vec![("__op".to_string(), json!("c"))];

        let headers = HeaderProjector::new(false, false).project(&record(), &added);

        assert_eq!(headers.get("__op"), Some(&HeaderValue::Json(json!("c"))));
        assert!(!headers.contains_key("trace_id"));
    }

    #[test]
    fn test_propagated_headers_never_override_reserved_keys() {
        let headers = HeaderProjector::new(false, true).project(&record(), &[]);

        assert_eq!(headers.get("trace_id"), Some(&HeaderValue::Json(json!("4bf92f35"))));
        assert_eq!(
            headers.get(CDC_TOPIC).and_then(HeaderValue::as_text),
            Some("dbserver1.inventory.orders")
        );
    }
}
