use serde_json::Value;

/// Single record header. Headers keep insertion order and may repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Wire-level unit handed to the broker client.
///
/// `partition` takes precedence over key-based partitioning when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<Header>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, key: Option<Vec<u8>>, value: Option<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key,
            value,
            headers: Vec::new(),
        }
    }
}

/// Wire-level unit read back from the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<Header>,
}

/// Broker acceptance receipt for one produced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Application-level record produced by the consumer pipeline.
///
/// `key`/`value` are `None` when the raw field was absent, or when a
/// decode failure was skipped without a registered fallback handler.
/// The origin record is kept for offset tracking and redelivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub topic: String,
    pub key: Option<Value>,
    pub value: Option<Value>,
    pub headers: Vec<Header>,
    pub origin: ConsumerRecord,
}

impl DecodedMessage {
    pub fn offset(&self) -> i64 {
        self.origin.offset
    }

    pub fn partition(&self) -> i32 {
        self.origin.partition
    }
}
