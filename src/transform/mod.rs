pub mod flatten;
pub mod headers;
pub mod serializer;

#[cfg(test)]
mod tests;

pub use flatten::{Flattened, RecordFlattener};
pub use headers::HeaderProjector;
pub use serializer::{RecordSerializer, SerializationFormat};

use bytes::Bytes;
use tracing::trace;

use crate::config::{Config, TombstoneConfig};
use crate::engine::ChangeRecord;
use crate::stream::envelope::{HeaderValue, OutboundEnvelope, Payload, CDC_KEY};
use crate::Result;

/// The per-record pipeline: flatten, classify tombstones, serialize, and
/// project headers into one [`OutboundEnvelope`].
#[derive(Debug, Clone)]
pub struct Transformer {
    flattener: RecordFlattener,
    serializer: RecordSerializer,
    projector: HeaderProjector,
    tombstones: TombstoneConfig,
}

impl Transformer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            flattener: RecordFlattener::new(config.flattening.clone(), config.tombstones.drop),
            serializer: RecordSerializer::new(config.stream.serialization),
            projector: HeaderProjector::from_config(&config.stream),
            tombstones: config.tombstones.clone(),
        }
    }

    /// Returns `None` when the record produces no output.
    pub fn transform(&self, record: ChangeRecord) -> Result<Option<OutboundEnvelope>> {
        let added = self.flattener.added_headers(&record);
        let record = match self.flattener.flatten(record) {
            Flattened::Record(record) => record,
            Flattened::Skip => return Ok(None),
        };

        if record.is_tombstone() && self.tombstones.drop {
            trace!(topic = %record.topic, "Suppressing tombstone");
            return Ok(None);
        }

        let key = self.serializer.serialize_key(&record)?;
        let mut headers = self.projector.project(&record, &added);
        headers.insert(CDC_KEY.to_string(), HeaderValue::Bytes(key.clone()));

        let (payload, content_type) = match self.serializer.serialize_value(&record)? {
            Some(bytes) => (
                Payload::Bytes(bytes),
                self.serializer.content_type().to_string(),
            ),
            None => (
                Payload::Tombstone {
                    sentinel: Bytes::from(self.tombstones.sentinel.clone()),
                },
                self.tombstones.content_type.clone(),
            ),
        };

        Ok(Some(OutboundEnvelope::new(payload, key, content_type, headers)))
    }
}
