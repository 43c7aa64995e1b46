use serde_json::Value;

use crate::error::BrokerError;
use crate::record::{Header, RecordMetadata};

type AckFn = Box<dyn FnOnce(RecordMetadata) + Send>;
type NackFn = Box<dyn FnOnce(BrokerError) + Send>;

/// Application-level outgoing message.
///
/// The emitter owns the message until the broker client accepts it; at
/// that point the sink fires `ack` (or `nack` with the failure cause)
/// exactly once and the ack contract returns to the emitter.
pub struct Message {
    pub key: Option<Value>,
    pub value: Value,
    pub headers: Vec<Header>,
    ack: Option<AckFn>,
    nack: Option<NackFn>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("headers", &self.headers.len())
            .finish()
    }
}

impl Message {
    pub fn of(value: impl Into<Value>) -> Self {
        Self {
            key: None,
            value: value.into(),
            headers: Vec::new(),
            ack: None,
            nack: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Callback invoked when the broker confirms persistence.
    pub fn on_ack(mut self, f: impl FnOnce(RecordMetadata) + Send + 'static) -> Self {
        self.ack = Some(Box::new(f));
        self
    }

    /// Callback invoked with the failure cause when delivery fails.
    pub fn on_nack(mut self, f: impl FnOnce(BrokerError) + Send + 'static) -> Self {
        self.nack = Some(Box::new(f));
        self
    }

    /// Fire the acknowledgment callback. Consumes the message — the
    /// ack contract transfers back to the emitter here.
    pub fn ack(mut self, metadata: RecordMetadata) {
        if let Some(f) = self.ack.take() {
            f(metadata);
        }
    }

    /// Fire the negative-acknowledgment callback with the cause.
    pub fn nack(mut self, cause: BrokerError) {
        if let Some(f) = self.nack.take() {
            f(cause);
        }
    }
}
