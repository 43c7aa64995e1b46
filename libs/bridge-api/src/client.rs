use std::future::Future;
use std::pin::Pin;

use crate::error::BrokerError;
use crate::record::{ConsumerRecord, ProducerRecord, RecordMetadata};

/// Initial consumer position when no committed offset exists.
///
/// Passed through to the broker client (`auto.offset.reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerPosition {
    Earliest,
    #[default]
    Latest,
}

/// Broker client handle — the external collaborator of the bridge.
///
/// A handle is owned by exactly one task (`&mut self` on every I/O
/// method); independent producer tasks each hold their own handle, the
/// shared-mode merge task holds the only one. Cluster administration,
/// rebalancing and offset commits live behind this seam, not in the
/// bridge.
pub trait BrokerClient: Send {
    /// Hand one record to the broker. Resolves once the broker has
    /// accepted it, with the assigned partition/offset.
    fn send(
        &mut self,
        record: ProducerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, BrokerError>> + Send + '_>>;

    /// Fetch the next batch of records for the subscribed topic.
    /// An empty batch means nothing new was available.
    fn poll(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConsumerRecord>, BrokerError>> + Send + '_>>;

    /// Partition count of a topic, from broker metadata.
    fn partition_count(&self, topic: &str) -> Result<usize, BrokerError>;
}

/// Creates broker client handles for the bridge.
///
/// Independent producer mode asks for a fresh producer handle per
/// upstream source; shared mode asks for exactly one.
pub trait BrokerClientFactory: Send + Sync {
    fn producer(&self) -> Result<Box<dyn BrokerClient>, BrokerError>;

    fn consumer(
        &self,
        topic: &str,
        position: ConsumerPosition,
    ) -> Result<Box<dyn BrokerClient>, BrokerError>;
}
