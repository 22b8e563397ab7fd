#![allow(dead_code)]

use cdc_bridge::config::{Config, EngineConfig};
use cdc_bridge::engine::{ChangeRecord, Operation, SourceOffset};
use serde_json::{json, Value};
use std::env;

/// Test configuration with a short poll interval so stop requests are
/// noticed quickly.
pub fn get_test_config() -> Config {
    let grace_ms = env::var("TEST_STOP_GRACE_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2000);

    Config {
        engine: EngineConfig {
            name: format!("test-{}", std::process::id()),
            poll_interval_ms: 10,
            stop_grace_period_ms: grace_ms,
            ..EngineConfig::default()
        },
        ..Config::default()
    }
}

/// An insert on `inventory.customers` wrapped in a change envelope.
pub fn insert(key: i64, name: &str) -> ChangeRecord {
    ChangeRecord::new("dbserver1.inventory.customers", Operation::Create)
        .with_key(json!(key))
        .with_value(json!({
            "before": null,
            "after": {"id": key, "name": name},
            "source": {"db": "inventory", "table": "customers"},
            "op": "c",
        }))
        .with_offset(SourceOffset::new().with("lsn", key))
}

/// A raw tombstone: key only, no value.
pub fn tombstone(key: i64) -> ChangeRecord {
    ChangeRecord::new("dbserver1.inventory.customers", Operation::Delete)
        .with_key(json!(key))
        .with_offset(SourceOffset::new().with("lsn", key))
}

pub fn payload_name(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).unwrap();
    value["name"].as_str().unwrap().to_string()
}
