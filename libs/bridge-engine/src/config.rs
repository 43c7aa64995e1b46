use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration — parsed from TOML.
///
/// One `[[incoming]]`/`[[outgoing]]` table per channel. Broker-style
/// dotted keys (`"value.deserializer"`) are quoted TOML keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub incoming: Vec<IncomingConfig>,

    #[serde(default)]
    pub outgoing: Vec<OutgoingConfig>,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }
}

/// Inbound channel: broker topic → decoded application messages.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingConfig {
    /// Logical channel identifier, used for conflict detection.
    #[serde(rename = "channel-name")]
    pub name: String,

    /// Broker topic; defaults to the channel name.
    #[serde(default)]
    pub topic: Option<String>,

    /// Codec identifier for the record key. Absent = key not decoded.
    #[serde(rename = "key.deserializer", default)]
    pub key_deserializer: Option<String>,

    /// Codec identifier for the record value.
    #[serde(rename = "value.deserializer")]
    pub value_deserializer: String,

    /// Failure-handler identifier for key decode failures.
    #[serde(rename = "key-deserialization-failure-handler", default)]
    pub key_failure_handler: Option<String>,

    /// Failure-handler identifier for value decode failures.
    #[serde(rename = "value-deserialization-failure-handler", default)]
    pub value_failure_handler: Option<String>,

    /// Fatal-halt (true) vs skip-on-failure when no handler resolves.
    #[serde(rename = "fail-on-deserialization-failure", default = "default_true")]
    pub fail_on_deserialization_failure: bool,

    /// Whether decode failures affect the liveness flag.
    #[serde(rename = "health-enabled", default = "default_true")]
    pub health_enabled: bool,

    /// Initial consumer position: "earliest" or "latest".
    #[serde(rename = "auto.offset.reset", default = "default_offset_reset")]
    pub auto_offset_reset: String,

    /// Allow the same channel name on the opposite direction.
    #[serde(default)]
    pub merge: bool,

    /// Capacity of the decoded-message hand-off queue.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl IncomingConfig {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }
}

/// Producer wiring mode (see the sink for semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Every attached source owns a private broker-client handle.
    Independent,
    /// All attached sources merge into one single-handle pipeline.
    #[default]
    Shared,
}

/// Outbound channel: application messages → broker topic.
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingConfig {
    #[serde(rename = "channel-name")]
    pub name: String,

    /// Broker topic; defaults to the channel name.
    #[serde(default)]
    pub topic: Option<String>,

    /// Codec identifier for the message key.
    #[serde(rename = "key.serializer", default = "default_codec")]
    pub key_serializer: String,

    /// Codec identifier for the message value.
    #[serde(rename = "value.serializer")]
    pub value_serializer: String,

    #[serde(default)]
    pub mode: SinkMode,

    /// Allow the same channel name on the opposite direction.
    #[serde(default)]
    pub merge: bool,

    /// Capacity of each upstream hand-off queue.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl OutgoingConfig {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }
}

fn default_true() -> bool {
    true
}
fn default_buffer() -> usize {
    256
}
fn default_offset_reset() -> String {
    "latest".into()
}
fn default_codec() -> String {
    "json".into()
}
