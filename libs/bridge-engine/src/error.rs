use bridge_api::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("channel '{0}' is declared as both incoming and outgoing without merge")]
    Conflict(String),

    #[error("unknown codec '{0}'")]
    UnknownCodec(String),

    #[error("unknown deserialization failure handler '{0}'")]
    UnknownFailureHandler(String),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Broker`, context is added to the inner `BrokerError`.
    /// For message-carrying variants, context is prepended.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Broker(e) => EngineError::Broker(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::UnknownCodec(msg) => EngineError::UnknownCodec(format!("{ctx}: {msg}")),
            EngineError::UnknownFailureHandler(msg) => {
                EngineError::UnknownFailureHandler(format!("{ctx}: {msg}"))
            }
            other => other,
        }
    }
}
