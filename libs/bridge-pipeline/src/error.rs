use bridge_api::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("channel '{channel}': broker connection failed: {source}")]
    Connection { channel: String, source: BrokerError },
}
