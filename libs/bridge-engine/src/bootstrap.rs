use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{
    BrokerClientFactory, ConsumerPosition, DecodedMessage, HealthRegistry, HealthStatus, Message,
};
use bridge_pipeline::{
    FieldDecoder, PipelineError, SinkOptions, SourceOptions, spawn_consumer_source,
    spawn_independent_sink, spawn_shared_sink,
};

use crate::channels::{ChannelDirection, ChannelRegistry, ChannelSpec};
use crate::config::{BridgeConfig, IncomingConfig, OutgoingConfig, SinkMode};
use crate::error::EngineError;
use crate::registry::{CodecRegistry, FailureHandlerRegistry};

/// Idle delay between empty consumer polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-task join handle, kept for shutdown.
struct TaskSlot {
    name: String,
    handle: JoinHandle<Result<(), PipelineError>>,
}

/// Validated outgoing channel, ready to hand senders to emitters.
struct OutgoingSlot {
    opts: SinkOptions,
    buffer: usize,
    wiring: SinkWiring,
}

/// How emitters reach the channel: the single merge queue all of them
/// feed, or a fresh sink task per attachment.
enum SinkWiring {
    Shared(mpsc::Sender<Message>),
    Independent,
}

/// The running bridge — validated channel table plus pipeline tasks.
///
/// `bootstrap` runs all validation (channel conflicts, codec and
/// failure-handler resolution) to completion for every declared
/// channel before the first task spawns; one bad channel means no
/// partial wiring.
pub struct Engine {
    factory: Arc<dyn BrokerClientFactory>,
    health: Arc<HealthRegistry>,
    channels: ChannelRegistry,
    incoming: HashMap<String, mpsc::Receiver<DecodedMessage>>,
    outgoing: HashMap<String, OutgoingSlot>,
    tasks: Vec<TaskSlot>,
    token: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("channels", &self.channels)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Engine {
    /// Bootstrap the bridge from a parsed configuration.
    ///
    /// Validates the channel table, resolves every codec and handler
    /// identifier, then spawns consumer sources and shared-mode sinks
    /// as tokio tasks.
    pub async fn bootstrap(
        config: BridgeConfig,
        factory: Arc<dyn BrokerClientFactory>,
        codecs: &CodecRegistry,
        handlers: &FailureHandlerRegistry,
    ) -> Result<Self, EngineError> {
        // --- 1. Channel table: conflicts abort before anything runs ---
        let mut channels = ChannelRegistry::new();
        for cfg in &config.incoming {
            channels.register(ChannelSpec {
                name: cfg.name.clone(),
                direction: ChannelDirection::Incoming,
                merge: cfg.merge,
            })?;
        }
        for cfg in &config.outgoing {
            channels.register(ChannelSpec {
                name: cfg.name.clone(),
                direction: ChannelDirection::Outgoing,
                merge: cfg.merge,
            })?;
        }

        // --- 2. Resolve identifiers for every channel ---
        let mut sources = Vec::new();
        for cfg in &config.incoming {
            sources.push((cfg.clone(), build_source(cfg, codecs, handlers)?));
        }
        let mut sinks = Vec::new();
        for cfg in &config.outgoing {
            sinks.push((cfg.clone(), build_sink(cfg, codecs)?));
        }

        // --- 3. Broker handles for every channel, then the tasks ---
        // Every handle exists before the first task spawns; a handle
        // failure on any channel leaves nothing running behind the
        // error.
        let mut source_slots = Vec::new();
        for (cfg, (opts, position)) in sources {
            let ctx = format!("channel '{}'", cfg.name);
            let client = factory
                .consumer(cfg.topic(), position)
                .map_err(|e| EngineError::from(e).with_context(&ctx))?;
            log_partitions(&cfg.name, cfg.topic(), client.partition_count(cfg.topic()));
            source_slots.push((cfg, opts, client));
        }
        let mut sink_slots = Vec::new();
        for (cfg, opts) in sinks {
            let client = if cfg.mode == SinkMode::Shared {
                let ctx = format!("channel '{}'", cfg.name);
                let client = factory
                    .producer()
                    .map_err(|e| EngineError::from(e).with_context(&ctx))?;
                log_partitions(&cfg.name, cfg.topic(), client.partition_count(cfg.topic()));
                Some(client)
            } else {
                None
            };
            sink_slots.push((cfg, opts, client));
        }

        let health = Arc::new(HealthRegistry::new());
        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        let mut incoming = HashMap::new();
        for (cfg, opts, client) in source_slots {
            let (tx, rx) = mpsc::channel(cfg.buffer);
            let handle = spawn_consumer_source(
                opts,
                client,
                health.register(&cfg.name),
                tx,
                token.clone(),
            );
            incoming.insert(cfg.name.clone(), rx);
            tasks.push(TaskSlot { name: cfg.name, handle });
        }

        let mut outgoing = HashMap::new();
        for (cfg, opts, client) in sink_slots {
            let wiring = match client {
                Some(client) => {
                    let (tx, rx) = mpsc::channel(cfg.buffer);
                    let handle = spawn_shared_sink(opts.clone(), client, vec![rx], token.clone());
                    tasks.push(TaskSlot { name: cfg.name.clone(), handle });
                    SinkWiring::Shared(tx)
                }
                None => SinkWiring::Independent,
            };
            health.register(&cfg.name).set_ready(true);
            outgoing.insert(cfg.name, OutgoingSlot { opts, buffer: cfg.buffer, wiring });
        }

        tracing::info!(
            channels = channels.len(),
            tasks = tasks.len(),
            "bridge bootstrapped"
        );
        Ok(Engine {
            factory,
            health,
            channels,
            incoming,
            outgoing,
            tasks,
            token,
        })
    }

    /// Decoded-message stream of an incoming channel. Each channel's
    /// receiver can be taken once.
    pub fn take_incoming(&mut self, channel: &str) -> Option<mpsc::Receiver<DecodedMessage>> {
        self.incoming.remove(channel)
    }

    /// Attach one upstream source to an outgoing channel.
    ///
    /// Shared mode hands out another sender into the channel's merge
    /// queue; independent mode spawns a dedicated sink task with its
    /// own broker-client handle. Dropping the sender signals graceful
    /// completion of that source.
    pub fn attach_source(&mut self, channel: &str) -> Result<mpsc::Sender<Message>, EngineError> {
        let slot = self
            .outgoing
            .get(channel)
            .ok_or_else(|| EngineError::Config(format!("unknown outgoing channel '{channel}'")))?;

        match &slot.wiring {
            SinkWiring::Shared(tx) => Ok(tx.clone()),
            SinkWiring::Independent => {
                let opts = slot.opts.clone();
                let buffer = slot.buffer;
                let ctx = format!("channel '{channel}'");
                let client = self
                    .factory
                    .producer()
                    .map_err(|e| EngineError::from(e).with_context(&ctx))?;
                let (tx, rx) = mpsc::channel(buffer);
                let handle = spawn_independent_sink(opts, client, rx, self.token.clone());
                self.tasks.push(TaskSlot { name: channel.to_string(), handle });
                Ok(tx)
            }
        }
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn health_snapshot(&self) -> Vec<HealthStatus> {
        self.health.snapshot()
    }

    /// Graceful shutdown: release outgoing queues, cancel all tasks
    /// and wait for them. Messages the sinks could not deliver get
    /// their negative acknowledgment on the way down.
    pub async fn shutdown(mut self) {
        self.outgoing.clear();
        self.token.cancel();
        for slot in self.tasks {
            match slot.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(channel = %slot.name, error = %e, "task ended with failure")
                }
                Err(e) => tracing::error!(channel = %slot.name, error = %e, "task panicked"),
            }
        }
        tracing::info!("bridge shut down");
    }
}

fn log_partitions(channel: &str, topic: &str, count: Result<usize, bridge_api::BrokerError>) {
    match count {
        Ok(partitions) => {
            tracing::info!(channel = %channel, topic = %topic, partitions, "channel wired");
        }
        Err(e) => tracing::warn!(channel = %channel, topic = %topic, error = %e, "no partition metadata"),
    }
}

// ---------------------------------------------------------------------------
// Per-channel option assembly — all identifier resolution lives here
// ---------------------------------------------------------------------------

fn build_source(
    cfg: &IncomingConfig,
    codecs: &CodecRegistry,
    handlers: &FailureHandlerRegistry,
) -> Result<(SourceOptions, ConsumerPosition), EngineError> {
    let ctx = format!("channel '{}'", cfg.name);

    let value_decoder = Some(FieldDecoder {
        identifier: cfg.value_deserializer.clone(),
        codec: codecs
            .deserializer(&cfg.value_deserializer)
            .map_err(|e| e.with_context(&ctx))?,
        fallback: cfg
            .value_failure_handler
            .as_deref()
            .map(|id| handlers.resolve_required(id))
            .transpose()
            .map_err(|e| e.with_context(&ctx))?,
    });

    let key_fallback = cfg
        .key_failure_handler
        .as_deref()
        .map(|id| handlers.resolve_required(id))
        .transpose()
        .map_err(|e| e.with_context(&ctx))?;
    let key_decoder = cfg
        .key_deserializer
        .as_deref()
        .map(|id| -> Result<FieldDecoder, EngineError> {
            Ok(FieldDecoder {
                identifier: id.to_string(),
                codec: codecs.deserializer(id).map_err(|e| e.with_context(&ctx))?,
                fallback: key_fallback.clone(),
            })
        })
        .transpose()?;

    let position = parse_position(&cfg.auto_offset_reset)
        .map_err(|e| e.with_context(&ctx))?;

    let opts = SourceOptions {
        channel: cfg.name.clone(),
        topic: cfg.topic().to_string(),
        key_decoder,
        value_decoder,
        fail_on_deserialization_failure: cfg.fail_on_deserialization_failure,
        health_enabled: cfg.health_enabled,
        poll_interval: POLL_INTERVAL,
    };
    Ok((opts, position))
}

fn build_sink(cfg: &OutgoingConfig, codecs: &CodecRegistry) -> Result<SinkOptions, EngineError> {
    let ctx = format!("channel '{}'", cfg.name);
    Ok(SinkOptions {
        channel: cfg.name.clone(),
        topic: cfg.topic().to_string(),
        key_serializer: codecs
            .serializer(&cfg.key_serializer)
            .map_err(|e| e.with_context(&ctx))?,
        value_serializer: codecs
            .serializer(&cfg.value_serializer)
            .map_err(|e| e.with_context(&ctx))?,
        merge_buffer: cfg.buffer,
    })
}

/// Parse `auto.offset.reset` → ConsumerPosition.
fn parse_position(s: &str) -> Result<ConsumerPosition, EngineError> {
    match s {
        "earliest" => Ok(ConsumerPosition::Earliest),
        "latest" => Ok(ConsumerPosition::Latest),
        other => Err(EngineError::Config(format!(
            "unknown auto.offset.reset: '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use bridge_api::{
        BrokerClient, BrokerError, ConstantFallback, ConsumerRecord, InMemoryBroker,
        ProducerRecord, RecordMetadata,
    };

    use super::*;

    fn round_trip_config(mode: &str) -> BridgeConfig {
        BridgeConfig::parse(&format!(
            r#"
            [[outgoing]]
            channel-name = "events-out"
            topic = "events"
            "key.serializer" = "json"
            "value.serializer" = "json"
            mode = "{mode}"

            [[incoming]]
            channel-name = "events-in"
            topic = "events"
            "key.deserializer" = "json"
            "value.deserializer" = "json"
            "auto.offset.reset" = "earliest"
            "#
        ))
        .unwrap()
    }

    async fn wait_for(broker: &InMemoryBroker, topic: &str, count: usize) {
        for _ in 0..200 {
            if broker.record_count(topic) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} records in '{topic}'");
    }

    #[tokio::test]
    async fn conflicting_channel_names_abort_bootstrap() {
        let config = BridgeConfig::parse(
            r#"
            [[incoming]]
            channel-name = "my-topic"
            topic = "my-topic-1"
            "value.deserializer" = "string"

            [[outgoing]]
            channel-name = "my-topic"
            topic = "my-topic-1"
            "value.serializer" = "string"
            "#,
        )
        .unwrap();

        let broker = InMemoryBroker::new(1);
        let err = Engine::bootstrap(
            config,
            Arc::new(broker),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(name) if name == "my-topic"));
    }

    #[tokio::test]
    async fn merge_policy_permits_both_directions() {
        let config = BridgeConfig::parse(
            r#"
            [[incoming]]
            channel-name = "my-topic"
            topic = "my-topic-1"
            "value.deserializer" = "string"
            merge = true

            [[outgoing]]
            channel-name = "my-topic"
            topic = "my-topic-1"
            "value.serializer" = "string"
            "#,
        )
        .unwrap();

        let broker = InMemoryBroker::new(1);
        let engine = Engine::bootstrap(
            config,
            Arc::new(broker),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap();
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn unresolved_handler_identifier_aborts_bootstrap() {
        let config = BridgeConfig::parse(
            r#"
            [[incoming]]
            channel-name = "events"
            "value.deserializer" = "json"
            "value-deserialization-failure-handler" = "no-such-handler"
            "#,
        )
        .unwrap();

        let broker = InMemoryBroker::new(1);
        let err = Engine::bootstrap(
            config,
            Arc::new(broker),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownFailureHandler(_)));
        assert!(err.to_string().contains("channel 'events'"));
    }

    #[tokio::test]
    async fn unresolved_codec_identifier_aborts_bootstrap() {
        let config = BridgeConfig::parse(
            r#"
            [[outgoing]]
            channel-name = "events"
            "value.serializer" = "avro"
            "#,
        )
        .unwrap();

        let broker = InMemoryBroker::new(1);
        let err = Engine::bootstrap(
            config,
            Arc::new(broker),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownCodec(_)));
    }

    #[tokio::test]
    async fn shared_mode_round_trip() {
        let broker = InMemoryBroker::new(2);
        broker.create_topic("events", 2);
        let mut engine = Engine::bootstrap(
            round_trip_config("shared"),
            Arc::new(broker.clone()),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap();

        let mut rx = engine.take_incoming("events-in").unwrap();
        let tx = engine.attach_source("events-out").unwrap();
        let tx2 = engine.attach_source("events-out").unwrap();

        tx.send(Message::of(json!({"n": 1})).with_key(json!("k")))
            .await
            .unwrap();
        tx2.send(Message::of(json!({"n": 2})).with_key(json!("k")))
            .await
            .unwrap();
        drop(tx);
        drop(tx2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key, Some(json!("k")));
        let second = rx.recv().await.unwrap();
        // Same key, one partition: merge order is delivery order.
        assert_eq!(first.value, Some(json!({"n": 1})));
        assert_eq!(second.value, Some(json!({"n": 2})));

        let report = engine.health_snapshot();
        assert!(report.iter().all(|status| status.live && status.ready));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn independent_mode_spawns_a_sink_per_source() {
        let broker = InMemoryBroker::new(1);
        broker.create_topic("events", 1);
        let mut engine = Engine::bootstrap(
            round_trip_config("independent"),
            Arc::new(broker.clone()),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap();

        for n in 0..2 {
            let tx = engine.attach_source("events-out").unwrap();
            tokio::spawn(async move {
                for i in 0..3 {
                    tx.send(Message::of(json!({"source": n, "i": i})))
                        .await
                        .unwrap();
                }
            });
        }

        wait_for(&broker, "events", 6).await;
        engine.shutdown().await;
        assert_eq!(broker.record_count("events"), 6);
    }

    /// Counts polls, so a task that should never have started shows up.
    struct CountingClient {
        inner: Box<dyn BrokerClient>,
        polls: Arc<AtomicUsize>,
    }

    impl BrokerClient for CountingClient {
        fn send(
            &mut self,
            record: ProducerRecord,
        ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, BrokerError>> + Send + '_>>
        {
            self.inner.send(record)
        }

        fn poll(
            &mut self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ConsumerRecord>, BrokerError>> + Send + '_>>
        {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.inner.poll()
        }

        fn partition_count(&self, topic: &str) -> Result<usize, BrokerError> {
            self.inner.partition_count(topic)
        }
    }

    /// Hands out a limited number of consumer handles, then fails.
    struct FlakyFactory {
        inner: InMemoryBroker,
        good_consumers: AtomicUsize,
        polls: Arc<AtomicUsize>,
    }

    impl BrokerClientFactory for FlakyFactory {
        fn producer(&self) -> Result<Box<dyn BrokerClient>, BrokerError> {
            self.inner.producer()
        }

        fn consumer(
            &self,
            topic: &str,
            position: ConsumerPosition,
        ) -> Result<Box<dyn BrokerClient>, BrokerError> {
            if self
                .good_consumers
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(BrokerError::connection("broker unavailable"));
            }
            Ok(Box::new(CountingClient {
                inner: self.inner.consumer(topic, position)?,
                polls: self.polls.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn handle_failure_on_a_later_channel_spawns_nothing() {
        let polls = Arc::new(AtomicUsize::new(0));
        let factory = FlakyFactory {
            inner: InMemoryBroker::new(1),
            good_consumers: AtomicUsize::new(1),
            polls: polls.clone(),
        };

        let config = BridgeConfig::parse(
            r#"
            [[incoming]]
            channel-name = "first-in"
            "value.deserializer" = "json"

            [[incoming]]
            channel-name = "second-in"
            "value.deserializer" = "json"
            "#,
        )
        .unwrap();

        let err = Engine::bootstrap(
            config,
            Arc::new(factory),
            &CodecRegistry::new(),
            &FailureHandlerRegistry::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("second-in"));

        // The first channel's handle was created, but no consumer task
        // ever ran against it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registered_handler_recovers_through_the_engine() {
        let broker = InMemoryBroker::new(1);
        broker.create_topic("raw", 1);
        // A string-encoded record on a json channel: decode fails,
        // the registered handler substitutes.
        {
            let mut client = broker.client();
            client
                .send(bridge_api::ProducerRecord::new(
                    "raw",
                    None,
                    Some(b"not json {{".to_vec()),
                ))
                .await
                .unwrap();
        }

        let config = BridgeConfig::parse(
            r#"
            [[incoming]]
            channel-name = "raw-in"
            topic = "raw"
            "value.deserializer" = "json"
            "value-deserialization-failure-handler" = "value-fallback"
            "auto.offset.reset" = "earliest"
            "#,
        )
        .unwrap();
        let mut handlers = FailureHandlerRegistry::new();
        handlers.register(
            "value-fallback",
            Arc::new(ConstantFallback(json!({"fallback": "fallback"}))),
        );

        let mut engine = Engine::bootstrap(
            config,
            Arc::new(broker),
            &CodecRegistry::new(),
            &handlers,
        )
        .await
        .unwrap();

        let mut rx = engine.take_incoming("raw-in").unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.value, Some(json!({"fallback": "fallback"})));
        assert!(engine.health().get("raw-in").unwrap().is_live());
        engine.shutdown().await;
    }
}
