use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{
    BrokerClient, BrokerError, ChannelHealth, ConsumerRecord, DecodedMessage,
    Deserializer, DeserializationFailureHandler,
};

use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Consumer source — broker reads → decoded application messages
// ═══════════════════════════════════════════════════════════════

/// Decoder slot for one field (key or value): the configured codec
/// plus the optional fallback handler resolved at startup.
#[derive(Clone)]
pub struct FieldDecoder {
    /// Codec identifier, handed to the fallback on failure.
    pub identifier: String,
    pub codec: Arc<dyn Deserializer>,
    pub fallback: Option<Arc<dyn DeserializationFailureHandler>>,
}

/// Per-channel source settings, assembled from validated configuration.
#[derive(Clone)]
pub struct SourceOptions {
    pub channel: String,
    pub topic: String,
    /// `None` leaves the raw field undecoded (emitted as absent).
    pub key_decoder: Option<FieldDecoder>,
    pub value_decoder: Option<FieldDecoder>,
    /// Fail-fast policy: a decode failure with no fallback handler
    /// halts the channel instead of skipping the field.
    pub fail_on_deserialization_failure: bool,
    /// Whether decode failures flip the channel liveness flag.
    pub health_enabled: bool,
    /// Idle delay between empty polls.
    pub poll_interval: Duration,
}

/// Outcome of running one record through the decode state machine:
/// Received → Decoding → {Decoded | Failed}.
enum DecodeOutcome {
    Decoded(DecodedMessage),
    /// Fatal: no handler under fail-fast policy. The record is never
    /// emitted and the channel halts.
    Failed(BrokerError),
}

/// Spawn a consumer source: poll the broker, decode key and value,
/// emit [`DecodedMessage`]s downstream.
///
/// The first fatal decode failure flips the channel liveness flag
/// (compare-and-set, first failure wins) and stops record processing
/// for this channel; the task returns without an error since the
/// flag is the user-visible signal.
pub fn spawn_consumer_source(
    opts: SourceOptions,
    mut client: Box<dyn BrokerClient>,
    health: Arc<ChannelHealth>,
    tx: mpsc::Sender<DecodedMessage>,
    token: CancellationToken,
) -> JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(async move {
        health.set_ready(true);
        tracing::info!(channel = %opts.channel, topic = %opts.topic, "consumer started");

        let result = poll_loop(&opts, &mut client, &health, &tx, &token).await;

        health.set_ready(false);
        match &result {
            Ok(()) => tracing::info!(channel = %opts.channel, "consumer finished"),
            Err(e) => tracing::error!(channel = %opts.channel, error = %e, "consumer failed"),
        }
        result
    })
}

async fn poll_loop(
    opts: &SourceOptions,
    client: &mut Box<dyn BrokerClient>,
    health: &ChannelHealth,
    tx: &mpsc::Sender<DecodedMessage>,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    loop {
        let batch = tokio::select! {
            batch = client.poll() => batch,
            _ = token.cancelled() => return Ok(()),
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) if e.is_fatal() => {
                return Err(PipelineError::Connection {
                    channel: opts.channel.clone(),
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!(channel = %opts.channel, error = %e, "poll failed, retrying");
                tokio::time::sleep(opts.poll_interval).await;
                continue;
            }
        };

        if batch.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(opts.poll_interval) => continue,
                _ = token.cancelled() => return Ok(()),
            }
        }

        for record in batch {
            match decode_record(opts, record) {
                DecodeOutcome::Decoded(message) => {
                    if tx.send(message).await.is_err() {
                        tracing::info!(channel = %opts.channel, "downstream closed, stopping");
                        return Ok(());
                    }
                }
                DecodeOutcome::Failed(cause) => {
                    tracing::error!(channel = %opts.channel, error = %cause, "decode failure, halting channel");
                    if opts.health_enabled {
                        health.mark_failed(&cause);
                    }
                    // Halted: remaining records are not attempted.
                    return Ok(());
                }
            }
        }
    }
}

/// Run one record through the decode state machine. Key and value are
/// decoded independently — a key failure does not block the value
/// decode and vice versa; both are attempted before the outcome is
/// decided.
fn decode_record(opts: &SourceOptions, record: ConsumerRecord) -> DecodeOutcome {
    let key = decode_field(opts, &record, true);
    let value = decode_field(opts, &record, false);

    match (key, value) {
        (Ok(key), Ok(value)) => DecodeOutcome::Decoded(DecodedMessage {
            topic: record.topic.clone(),
            key,
            value,
            headers: record.headers.clone(),
            origin: record,
        }),
        (Err(cause), _) | (_, Err(cause)) => DecodeOutcome::Failed(cause),
    }
}

/// Decode one field of a record.
///
/// `Ok(None)` means the field is absent: either no raw bytes, no
/// decoder configured, or a skipped failure under the skip policy.
/// `Err` is the fatal case — failure with no handler under fail-fast.
fn decode_field(
    opts: &SourceOptions,
    record: &ConsumerRecord,
    is_key: bool,
) -> Result<Option<serde_json::Value>, BrokerError> {
    let (decoder, raw) = if is_key {
        (opts.key_decoder.as_ref(), record.key.as_deref())
    } else {
        (opts.value_decoder.as_ref(), record.value.as_deref())
    };
    let (Some(decoder), Some(raw)) = (decoder, raw) else {
        return Ok(None);
    };

    let cause = match decoder.codec.deserialize(&record.topic, raw) {
        Ok(value) => return Ok(Some(value)),
        Err(cause) => cause,
    };

    let field = if is_key { "key" } else { "value" };
    if let Some(handler) = &decoder.fallback {
        tracing::debug!(
            channel = %opts.channel,
            field,
            deserializer = %decoder.identifier,
            error = %cause,
            "decode failed, applying fallback"
        );
        return Ok(Some(handler.recover(
            &record.topic,
            is_key,
            &decoder.identifier,
            raw,
            &cause,
            &record.headers,
        )));
    }

    if opts.fail_on_deserialization_failure {
        return Err(cause.with_context(format!(
            "channel '{}' {field} (deserializer '{}')",
            opts.channel, decoder.identifier
        )));
    }

    tracing::warn!(
        channel = %opts.channel,
        field,
        deserializer = %decoder.identifier,
        error = %cause,
        "decode failed, skipping field"
    );
    Ok(None)
}
