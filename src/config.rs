use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stream::bridge::BackpressurePolicy;
use crate::transform::serializer::SerializationFormat;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub flattening: FlatteningConfig,
    #[serde(default)]
    pub tombstones: TombstoneConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_name")]
    pub name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stop_grace_period_ms")]
    pub stop_grace_period_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub offset_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub serialization: SerializationFormat,
    /// Adds the serialized source offset as the `cdc_offset` header.
    #[serde(default)]
    pub include_offset: bool,
    /// Copies connector headers onto the outbound envelope.
    #[serde(default = "default_true")]
    pub propagate_headers: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlatteningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub delete_handling: DeleteHandling,
    #[serde(default)]
    pub add_fields: Vec<String>,
    #[serde(default)]
    pub add_headers: Vec<String>,
}

/// What a flattened delete event turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteHandling {
    /// Emit the row as it was before the delete.
    #[default]
    Before,
    /// Emit the before-row with a `__deleted: "true"` marker field.
    Rewrite,
    /// Emit a record with an absent value.
    Tombstone,
    /// Emit nothing.
    Drop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TombstoneConfig {
    /// Suppress records whose value is absent.
    #[serde(default)]
    pub drop: bool,
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    #[serde(default = "default_sentinel_content_type")]
    pub content_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    #[serde(default)]
    pub policy: OverflowPolicy,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Unbounded,
    Block,
    DropOldest,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(
                ::config::Environment::with_prefix("CDC_BRIDGE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.stop_grace_period_ms == 0 {
            return Err(Error::InvalidConfig(
                "engine.stop_grace_period_ms must be greater than zero".to_string(),
            ));
        }
        if self.engine.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "engine.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.buffer.policy != OverflowPolicy::Unbounded && self.buffer.capacity == 0 {
            return Err(Error::InvalidConfig(
                "buffer.capacity must be greater than zero for a bounded policy".to_string(),
            ));
        }
        if self.tombstones.content_type.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "tombstones.content_type must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backpressure(&self) -> BackpressurePolicy {
        match self.buffer.policy {
            OverflowPolicy::Unbounded => BackpressurePolicy::Unbounded,
            OverflowPolicy::Block => BackpressurePolicy::Block {
                capacity: self.buffer.capacity,
                timeout: Duration::from_millis(self.buffer.block_timeout_ms),
            },
            OverflowPolicy::DropOldest => BackpressurePolicy::DropOldest {
                capacity: self.buffer.capacity,
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_period_ms: default_stop_grace_period_ms(),
            batch_size: default_batch_size(),
            offset_file: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            serialization: SerializationFormat::default(),
            include_offset: false,
            propagate_headers: true,
        }
    }
}

impl Default for FlatteningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_handling: DeleteHandling::default(),
            add_fields: Vec::new(),
            add_headers: Vec::new(),
        }
    }
}

impl Default for TombstoneConfig {
    fn default() -> Self {
        Self {
            drop: false,
            sentinel: default_sentinel(),
            content_type: default_sentinel_content_type(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            policy: OverflowPolicy::default(),
            capacity: default_capacity(),
            block_timeout_ms: default_block_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_engine_name() -> String {
    "cdc-engine".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_stop_grace_period_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    500
}

fn default_sentinel() -> String {
    "null".to_string()
}

fn default_sentinel_content_type() -> String {
    "text/plain".to_string()
}

fn default_capacity() -> usize {
    1000
}

fn default_block_timeout_ms() -> u64 {
    30_000
}
