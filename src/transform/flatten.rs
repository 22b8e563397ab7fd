use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::{DeleteHandling, FlatteningConfig};
use crate::engine::{ChangeRecord, Operation};

const DELETED_FIELD: &str = "__deleted";

/// Result of flattening one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Flattened {
    Record(ChangeRecord),
    /// The record produces no output at all.
    Skip,
}

/// Collapses a `before`/`after`/`source`/`op` envelope into the row it
/// describes.
#[derive(Debug, Clone)]
pub struct RecordFlattener {
    config: FlatteningConfig,
    drop_tombstones: bool,
}

impl RecordFlattener {
    pub fn new(config: FlatteningConfig, drop_tombstones: bool) -> Self {
        Self {
            config,
            drop_tombstones,
        }
    }

    pub fn flatten(&self, mut record: ChangeRecord) -> Flattened {
        if !self.config.enabled {
            return Flattened::Record(record);
        }

        let Some(value) = record.value.take() else {
            return if self.drop_tombstones {
                trace!(topic = %record.topic, "Dropping tombstone");
                Flattened::Skip
            } else {
                Flattened::Record(record)
            };
        };

        let Some(envelope) = as_envelope(&value) else {
            // Already a plain row.
            record.value = Some(value);
            return Flattened::Record(record);
        };

        let row = match record.op {
            Operation::Truncate => {
                debug!(topic = %record.topic, "Skipping truncate event");
                return Flattened::Skip;
            }
            Operation::Delete if self.drop_tombstones => {
                trace!(topic = %record.topic, "Dropping delete event");
                return Flattened::Skip;
            }
            Operation::Delete => match self.config.delete_handling {
                DeleteHandling::Drop => return Flattened::Skip,
                DeleteHandling::Tombstone => None,
                DeleteHandling::Before => non_null(envelope.get("before")),
                DeleteHandling::Rewrite => non_null(envelope.get("before")).map(|mut row| {
                    if let Value::Object(fields) = &mut row {
                        fields.insert(DELETED_FIELD.to_string(), Value::String("true".to_string()));
                    }
                    row
                }),
            },
            Operation::Create | Operation::Read | Operation::Update => {
                non_null(envelope.get("after"))
            }
        };

        let row = row.map(|mut row| {
            if let Value::Object(fields) = &mut row {
                for name in &self.config.add_fields {
                    if let Some(found) = envelope_field(envelope, &record, name) {
                        fields.insert(added_name(name), found);
                    }
                }
            }
            row
        });

        if row.is_none() && self.drop_tombstones {
            return Flattened::Skip;
        }

        record.value = row;
        Flattened::Record(record)
    }

    /// The `add_headers` entries found in the record's envelope, as
    /// `__<name>` pairs. Empty when flattening is off or the value is not an
    /// envelope.
    pub fn added_headers(&self, record: &ChangeRecord) -> Vec<(String, Value)> {
        if !self.config.enabled || self.config.add_headers.is_empty() {
            return Vec::new();
        }
        let Some(envelope) = record.value.as_ref().and_then(as_envelope) else {
            return Vec::new();
        };

        self.config
            .add_headers
            .iter()
            .filter_map(|name| {
                envelope_field(envelope, record, name).map(|found| (added_name(name), found))
            })
            .collect()
    }
}

fn as_envelope(value: &Value) -> Option<&Map<String, Value>> {
    value
        .as_object()
        .filter(|fields| fields.contains_key("after") || fields.contains_key("before"))
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

/// Looks up `op`, `ts_ms`, `source.<name>` or any dotted path in the
/// envelope. `op` falls back to the record's own operation.
fn envelope_field(envelope: &Map<String, Value>, record: &ChangeRecord, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let mut current = envelope.get(parts.next()?);

    for part in parts {
        current = current.and_then(|value| value.get(part));
    }

    match current {
        Some(value) if !value.is_null() => Some(value.clone()),
        _ if path == "op" => Some(Value::String(record.op.code().to_string())),
        _ => {
            debug!("Field '{}' not found in change envelope", path);
            None
        }
    }
}

fn added_name(path: &str) -> String {
    format!("__{}", path.rsplit('.').next().unwrap_or(path))
}
