use std::fmt;

/// Error kind — mirrors the failure taxonomy of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or incomplete configuration.
    Config,
    /// Channel name declared for both directions without merge.
    Conflict,
    /// A key or value failed to decode.
    Decode,
    /// The broker rejected or failed to deliver one record.
    Send,
    /// The broker transport is unusable — fatal to its task.
    Connection,
}

/// Broker error — returned by client, codec and handler seams.
#[derive(Debug, Clone)]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Conflict, message: msg.into() }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Decode, message: msg.into() }
    }

    pub fn send(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Send, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connection, message: msg.into() }
    }

    /// A `Connection` error ends the task that observed it; anything
    /// else is contained to the record/message it happened on.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Connection
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → BrokerError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        Self::connection(e.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e.to_string())
    }
}

impl From<std::str::Utf8Error> for BrokerError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::decode(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for BrokerError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::decode(e.to_string())
    }
}
