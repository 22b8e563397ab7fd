#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::{Config, DeleteHandling};
    use crate::engine::{ChangeRecord, Operation, SourceOffset};
    use crate::stream::envelope::{HeaderValue, Payload, CDC_KEY, CDC_OFFSET, CDC_TOPIC};
    use serde_json::{json, Value};

    fn create_test_event(op: Operation) -> ChangeRecord {
        let before = match op {
            Operation::Delete | Operation::Update => json!({"id": 1, "name": "Old User"}),
            _ => Value::Null,
        };
        let after = match op {
            Operation::Delete => Value::Null,
            _ => json!({"id": 1, "name": "New User", "email": "user@example.com"}),
        };

        ChangeRecord::new("dbserver1.public.users", op)
            .with_key(json!({"id": 1}))
            .with_value(json!({
                "before": before,
                "after": after,
                "source": {"connector": "postgresql", "db": "testdb", "table": "users"},
                "op": op.code(),
                "ts_ms": 1234567890,
            }))
            .with_header("origin", json!("replica-a"))
            .with_offset(SourceOffset::new().with("lsn", "0/1234ABC"))
    }

    #[test]
    fn test_insert_envelope() {
        let transformer = Transformer::from_config(&Config::default());

        let envelope = transformer
            .transform(create_test_event(Operation::Create))
            .unwrap()
            .unwrap();

        let payload: Value = serde_json::from_slice(envelope.body()).unwrap();
        assert_eq!(payload["name"], "New User");
        assert!(payload.get("before").is_none());
        assert_eq!(envelope.content_type(), "application/json");
        assert_eq!(envelope.key().as_ref(), br#"{"id":1}"#);
        assert_eq!(
            envelope.header(CDC_KEY).and_then(HeaderValue::as_bytes),
            Some(envelope.key())
        );
        assert_eq!(envelope.topic(), Some("dbserver1.public.users"));
        assert_eq!(
            envelope.header("origin"),
            Some(&HeaderValue::Json(json!("replica-a")))
        );
        assert!(envelope.header(CDC_OFFSET).is_none());
    }

    #[test]
    fn test_unflattened_envelope_keeps_structure() {
        let mut config = Config::default();
        config.flattening.enabled = false;
        config.stream.include_offset = true;
        let transformer = Transformer::from_config(&config);

        let envelope = transformer
            .transform(create_test_event(Operation::Update))
            .unwrap()
            .unwrap();

        let payload: Value = serde_json::from_slice(envelope.body()).unwrap();
        assert_eq!(payload["before"]["name"], "Old User");
        assert_eq!(payload["source"]["connector"], "postgresql");
        assert_eq!(
            envelope.header(CDC_OFFSET).and_then(HeaderValue::as_text),
            Some(r#"{"lsn":"0/1234ABC"}"#)
        );
    }

    #[test]
    fn test_tombstone_forwarded_with_sentinel() {
        let transformer = Transformer::from_config(&Config::default());
        let record = ChangeRecord::new("dbserver1.public.users", Operation::Delete).with_key(json!(5));

        let envelope = transformer.transform(record).unwrap().unwrap();

        assert_eq!(
            envelope.payload(),
            &Payload::Tombstone {
                sentinel: bytes::Bytes::from_static(b"null")
            }
        );
        assert_eq!(envelope.content_type(), "text/plain");
        assert_eq!(envelope.key().as_ref(), b"5");
    }

    #[test]
    fn test_tombstone_suppressed() {
        let mut config = Config::default();
        config.tombstones.drop = true;
        let transformer = Transformer::from_config(&config);
        let record = ChangeRecord::new("dbserver1.public.users", Operation::Delete).with_key(json!(5));

        assert!(transformer.transform(record).unwrap().is_none());
    }

    #[test]
    fn test_suppression_applies_without_flattening() {
        let mut config = Config::default();
        config.flattening.enabled = false;
        config.tombstones.drop = true;
        let transformer = Transformer::from_config(&config);
        let record = ChangeRecord::new("t", Operation::Delete).with_key(json!(5));

        assert!(transformer.transform(record).unwrap().is_none());
    }

    #[test]
    fn test_delete_as_tombstone_uses_custom_sentinel() {
        let mut config = Config::default();
        config.flattening.delete_handling = DeleteHandling::Tombstone;
        config.tombstones.sentinel = "__deleted__".to_string();
        config.tombstones.content_type = "application/x-tombstone".to_string();
        let transformer = Transformer::from_config(&config);

        let envelope = transformer
            .transform(create_test_event(Operation::Delete))
            .unwrap()
            .unwrap();

        assert!(envelope.is_tombstone());
        assert_eq!(envelope.body().as_ref(), b"__deleted__");
        assert_eq!(envelope.content_type(), "application/x-tombstone");
    }

    #[test]
    fn test_keyless_record_has_empty_key_header() {
        let transformer = Transformer::from_config(&Config::default());
        let record = ChangeRecord::new("heartbeat", Operation::Read).with_value(json!({"ts": 1}));

        let envelope = transformer.transform(record).unwrap().unwrap();

        assert!(envelope.key().is_empty());
        assert_eq!(
            envelope.header(CDC_KEY),
            Some(&HeaderValue::Bytes(bytes::Bytes::new()))
        );
        assert!(envelope.header(CDC_TOPIC).is_some());
    }

    #[test]
    fn test_added_headers_without_header_propagation() {
        let mut config = Config::default();
        config.flattening.add_headers = vec!["op".to_string(), "source.table".to_string()];
        config.stream.propagate_headers = false;
        let transformer = Transformer::from_config(&config);

        let envelope = transformer
            .transform(create_test_event(Operation::Update))
            .unwrap()
            .unwrap();

        assert_eq!(envelope.header("__op"), Some(&HeaderValue::Json(json!("u"))));
        assert_eq!(
            envelope.header("__table"),
            Some(&HeaderValue::Json(json!("users")))
        );
        assert!(envelope.header("origin").is_none());
        assert_eq!(envelope.topic(), Some("dbserver1.public.users"));
    }
}
