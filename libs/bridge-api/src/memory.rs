use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::{BrokerClient, BrokerClientFactory, ConsumerPosition};
use crate::error::BrokerError;
use crate::record::{ConsumerRecord, ProducerRecord, RecordMetadata};

/// In-memory broker hub. Holds partitioned topic logs and hands out
/// per-task [`BrokerClient`] handles; every handle front-ends the same
/// shared log, so independently-owned producer handles still land in
/// one broker, which is what the production client gives us too.
///
/// Fault injection (`fail_sends`, `poison`) exists so send-failure and
/// connection-failure paths can be driven from tests and demos.
#[derive(Clone)]
pub struct InMemoryBroker {
    hub: Arc<Hub>,
}

struct Hub {
    topics: Mutex<HashMap<String, TopicLog>>,
    default_partitions: usize,
    /// How many upcoming sends fail with a Send-kind error.
    fail_sends: AtomicUsize,
    /// Once set, every operation fails with a Connection-kind error.
    poisoned: AtomicBool,
}

struct TopicLog {
    partitions: Vec<Vec<ConsumerRecord>>,
    /// Records in broker-arrival order, for order assertions.
    journal: Vec<ConsumerRecord>,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            journal: Vec::new(),
        }
    }
}

impl Hub {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        match self.topics.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("broker topic lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn check_connection(&self) -> Result<(), BrokerError> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(BrokerError::connection("broker connection lost"));
        }
        Ok(())
    }
}

impl InMemoryBroker {
    pub fn new(default_partitions: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                topics: Mutex::new(HashMap::new()),
                default_partitions: default_partitions.max(1),
                fail_sends: AtomicUsize::new(0),
                poisoned: AtomicBool::new(false),
            }),
        }
    }

    pub fn create_topic(&self, name: impl Into<String>, partitions: usize) {
        self.hub
            .topics()
            .insert(name.into(), TopicLog::new(partitions.max(1)));
    }

    /// Producer handle. Each task gets its own.
    pub fn client(&self) -> Box<dyn BrokerClient> {
        Box::new(MemoryClient {
            hub: self.hub.clone(),
            subscription: None,
            round_robin: 0,
        })
    }

    /// Consumer handle bound to one topic, with its own cursor.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        position: ConsumerPosition,
    ) -> Box<dyn BrokerClient> {
        let topic = topic.into();
        let cursors = {
            let mut topics = self.hub.topics();
            let log = topics
                .entry(topic.clone())
                .or_insert_with(|| TopicLog::new(self.hub.default_partitions));
            match position {
                ConsumerPosition::Earliest => vec![0; log.partitions.len()],
                ConsumerPosition::Latest => {
                    log.partitions.iter().map(|p| p.len() as i64).collect()
                }
            }
        };
        Box::new(MemoryClient {
            hub: self.hub.clone(),
            subscription: Some(Subscription { topic, cursors }),
            round_robin: 0,
        })
    }

    /// Everything written to a topic, in broker-arrival order.
    pub fn journal(&self, topic: &str) -> Vec<ConsumerRecord> {
        self.hub
            .topics()
            .get(topic)
            .map(|log| log.journal.clone())
            .unwrap_or_default()
    }

    pub fn record_count(&self, topic: &str) -> usize {
        self.hub
            .topics()
            .get(topic)
            .map(|log| log.journal.len())
            .unwrap_or(0)
    }

    /// Make the next `n` sends fail with a Send-kind error.
    pub fn fail_sends(&self, n: usize) {
        self.hub.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Simulate an unrecoverable transport failure.
    pub fn poison(&self) {
        self.hub.poisoned.store(true, Ordering::SeqCst);
    }
}

impl BrokerClientFactory for InMemoryBroker {
    fn producer(&self) -> Result<Box<dyn BrokerClient>, BrokerError> {
        self.hub.check_connection()?;
        Ok(self.client())
    }

    fn consumer(
        &self,
        topic: &str,
        position: ConsumerPosition,
    ) -> Result<Box<dyn BrokerClient>, BrokerError> {
        self.hub.check_connection()?;
        Ok(self.subscribe(topic, position))
    }
}

struct Subscription {
    topic: String,
    cursors: Vec<i64>,
}

struct MemoryClient {
    hub: Arc<Hub>,
    subscription: Option<Subscription>,
    round_robin: usize,
}

impl MemoryClient {
    fn partition_for(&mut self, record: &ProducerRecord, partitions: usize) -> usize {
        if let Some(p) = record.partition {
            return (p as usize) % partitions;
        }
        match &record.key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() as usize) % partitions
            }
            None => {
                self.round_robin = self.round_robin.wrapping_add(1);
                self.round_robin % partitions
            }
        }
    }
}

impl BrokerClient for MemoryClient {
    fn send(
        &mut self,
        record: ProducerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.hub.check_connection()?;

            if self
                .hub
                .fail_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BrokerError::send(format!(
                    "broker rejected record for topic '{}'",
                    record.topic
                )));
            }

            let default_partitions = self.hub.default_partitions;
            let hub = self.hub.clone();
            let mut topics = hub.topics();
            let log = topics
                .entry(record.topic.clone())
                .or_insert_with(|| TopicLog::new(default_partitions));

            let partition = self.partition_for(&record, log.partitions.len());
            let offset = log.partitions[partition].len() as i64;
            let stored = ConsumerRecord {
                topic: record.topic.clone(),
                partition: partition as i32,
                offset,
                key: record.key,
                value: record.value,
                headers: record.headers,
            };
            log.partitions[partition].push(stored.clone());
            log.journal.push(stored);

            Ok(RecordMetadata {
                topic: record.topic,
                partition: partition as i32,
                offset,
            })
        })
    }

    fn poll(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConsumerRecord>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.hub.check_connection()?;

            let Some(sub) = self.subscription.as_mut() else {
                return Err(BrokerError::config("poll on a handle with no subscription"));
            };

            let hub = self.hub.clone();
            let topics = hub.topics();
            let Some(log) = topics.get(&sub.topic) else {
                return Ok(Vec::new());
            };

            let mut batch = Vec::new();
            for (partition, records) in log.partitions.iter().enumerate() {
                let cursor = &mut sub.cursors[partition];
                for record in records.iter().skip(*cursor as usize) {
                    batch.push(record.clone());
                }
                *cursor = records.len() as i64;
            }
            Ok(batch)
        })
    }

    fn partition_count(&self, topic: &str) -> Result<usize, BrokerError> {
        self.hub.check_connection()?;
        Ok(self
            .hub
            .topics()
            .get(topic)
            .map(|log| log.partitions.len())
            .unwrap_or(self.hub.default_partitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn same_key_lands_in_one_partition() {
        let broker = InMemoryBroker::new(4);
        broker.create_topic("quotes", 4);
        let mut client = broker.client();

        for i in 0..10 {
            let record = ProducerRecord::new(
                "quotes",
                Some(b"EURUSD".to_vec()),
                Some(format!("m{i}").into_bytes()),
            );
            client.send(record).await.unwrap();
        }

        let journal = broker.journal("quotes");
        assert_eq!(journal.len(), 10);
        let partition = journal[0].partition;
        assert!(journal.iter().all(|r| r.partition == partition));
        // Offsets are contiguous within the partition.
        let offsets: Vec<i64> = journal.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, (0..10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn consumer_cursor_sees_each_record_once() {
        let broker = InMemoryBroker::new(2);
        broker.create_topic("t", 2);
        let mut producer = broker.client();
        let mut consumer = broker.subscribe("t", ConsumerPosition::Earliest);

        for i in 0..5 {
            producer
                .send(ProducerRecord::new("t", None, Some(vec![i])))
                .await
                .unwrap();
        }

        assert_eq!(consumer.poll().await.unwrap().len(), 5);
        assert!(consumer.poll().await.unwrap().is_empty());

        producer
            .send(ProducerRecord::new("t", None, Some(vec![9])))
            .await
            .unwrap();
        assert_eq!(consumer.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_position_skips_history() {
        let broker = InMemoryBroker::new(1);
        broker.create_topic("t", 1);
        let mut producer = broker.client();
        producer
            .send(ProducerRecord::new("t", None, Some(b"old".to_vec())))
            .await
            .unwrap();

        let mut consumer = broker.subscribe("t", ConsumerPosition::Latest);
        assert!(consumer.poll().await.unwrap().is_empty());

        producer
            .send(ProducerRecord::new("t", None, Some(b"new".to_vec())))
            .await
            .unwrap();
        let batch = consumer.poll().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value.as_deref(), Some(b"new".as_slice()));
    }

    #[tokio::test]
    async fn fault_injection_kinds() {
        let broker = InMemoryBroker::new(1);
        broker.create_topic("t", 1);
        let mut client = broker.client();

        broker.fail_sends(1);
        let err = client
            .send(ProducerRecord::new("t", None, Some(vec![1])))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Send);

        // Next send is fine again.
        client
            .send(ProducerRecord::new("t", None, Some(vec![2])))
            .await
            .unwrap();

        broker.poison();
        let err = client
            .send(ProducerRecord::new("t", None, Some(vec![3])))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert!(err.is_fatal());
    }
}
