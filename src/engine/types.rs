use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "c", alias = "CREATE", alias = "INSERT")]
    Create,
    #[serde(rename = "r", alias = "READ")]
    Read,
    #[serde(rename = "u", alias = "UPDATE")]
    Update,
    #[serde(rename = "d", alias = "DELETE")]
    Delete,
    #[serde(rename = "t", alias = "TRUNCATE")]
    Truncate,
}

impl Operation {
    pub fn code(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Read => "r",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Truncate => "t",
        }
    }
}

/// Opaque resumable position of a record in the source, as reported by the
/// engine. The bridge never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceOffset(pub Map<String, Value>);

impl SourceOffset {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One captured mutation.
///
/// A record whose `value` is `None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub topic: String,
    #[serde(default)]
    pub key: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub headers: Vec<(String, Value)>,
    #[serde(default)]
    pub offset: SourceOffset,
    pub op: Operation,
}

impl ChangeRecord {
    pub fn new(topic: impl Into<String>, op: Operation) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: None,
            headers: Vec::new(),
            offset: SourceOffset::default(),
            op,
        }
    }

    pub fn with_key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Value) -> Self {
        self.headers.push((name.into(), value));
        self
    }

    pub fn with_offset(mut self, offset: SourceOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}
