use serde_json::Value;

use crate::error::BrokerError;
use crate::record::Header;

/// Pluggable decode-failure fallback strategy.
///
/// Registered once at startup under a string identifier and resolved
/// per channel (one slot for the key, one for the value — both may
/// point at the same instance). The returned value substitutes the
/// field that failed to decode; the record keeps its provenance.
pub trait DeserializationFailureHandler: Send + Sync {
    /// `deserializer` is the configured codec identifier of the field,
    /// `data` the raw bytes it rejected, `cause` its error.
    fn recover(
        &self,
        topic: &str,
        is_key: bool,
        deserializer: &str,
        data: &[u8],
        cause: &BrokerError,
        headers: &[Header],
    ) -> Value;
}

/// Handler returning a fixed fallback value — enough for most
/// "substitute a sentinel and move on" policies.
pub struct ConstantFallback(pub Value);

impl DeserializationFailureHandler for ConstantFallback {
    fn recover(
        &self,
        _topic: &str,
        _is_key: bool,
        _deserializer: &str,
        _data: &[u8],
        _cause: &BrokerError,
        _headers: &[Header],
    ) -> Value {
        self.0.clone()
    }
}
