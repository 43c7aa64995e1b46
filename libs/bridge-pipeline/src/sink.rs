use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{BrokerClient, BrokerError, Message, ProducerRecord, Serializer};

use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Producer sink — upstream message streams → broker writes
// ═══════════════════════════════════════════════════════════════

/// Per-channel sink settings, assembled from validated configuration.
#[derive(Clone)]
pub struct SinkOptions {
    pub channel: String,
    pub topic: String,
    pub key_serializer: Arc<dyn Serializer>,
    pub value_serializer: Arc<dyn Serializer>,
    /// Capacity of the shared-mode merge queue. Backpressure: a full
    /// queue suspends every upstream sender uniformly.
    pub merge_buffer: usize,
}

/// Spawn an independent-mode sink: one upstream source, one private
/// broker-client handle, no cross-task synchronization.
///
/// Sends are awaited one at a time, so broker order for this source
/// (and hence for every key it emits) equals emission order.
pub fn spawn_independent_sink(
    opts: SinkOptions,
    mut client: Box<dyn BrokerClient>,
    mut rx: mpsc::Receiver<Message>,
    token: CancellationToken,
) -> JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(async move {
        let result = drain_messages(&opts, &mut client, &mut rx, &token).await;
        finish(&opts, rx, &result);
        result
    })
}

/// Spawn a shared-mode sink: N upstream sources are fanned into one
/// bounded merge queue, drained by a single task owning the only
/// broker-client handle. No concurrent callers touch the handle, so
/// it needs no internal locking.
///
/// Records sharing a key are written in merge order regardless of
/// which source emitted them; the merge point never reorders.
pub fn spawn_shared_sink(
    opts: SinkOptions,
    mut client: Box<dyn BrokerClient>,
    sources: Vec<mpsc::Receiver<Message>>,
    token: CancellationToken,
) -> JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(async move {
        let mut sources = sources.into_iter();
        let Some(mut first) = sources.next() else {
            tracing::warn!(channel = %opts.channel, "no upstream sources, stopping");
            return Ok(());
        };

        let Some(second) = sources.next() else {
            // Single source — no merge point needed.
            let result = drain_messages(&opts, &mut client, &mut first, &token).await;
            finish(&opts, first, &result);
            return result;
        };

        // Fan-in: one forwarder task per source, all feeding the
        // bounded merge queue. Waiting for a queue slot is the
        // backpressure credit each source suspends on, applied
        // uniformly across sources.
        let local = token.child_token();
        let (merge_tx, mut merge_rx) = mpsc::channel::<Message>(opts.merge_buffer);
        let mut forwarders: Vec<JoinHandle<()>> = Vec::new();
        for (idx, mut rx) in [first, second].into_iter().chain(sources).enumerate() {
            let tx = merge_tx.clone();
            let channel = opts.channel.clone();
            let t = local.clone();
            forwarders.push(tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        message = rx.recv() => match message {
                            Some(message) => message,
                            None => break,
                        },
                        _ = t.cancelled() => break,
                    };
                    tokio::select! {
                        permit = tx.reserve() => match permit {
                            Ok(permit) => permit.send(message),
                            Err(_) => {
                                message.nack(BrokerError::send("sink stopped before broker accept"));
                                break;
                            }
                        },
                        _ = t.cancelled() => {
                            message.nack(BrokerError::send("sink stopped before broker accept"));
                            break;
                        }
                    }
                }
                // A forwarder that stopped early may still hold queued
                // messages; every one gets its nack before the
                // receiver drops.
                rx.close();
                let orphaned = nack_backlog(&mut rx);
                if orphaned > 0 {
                    tracing::warn!(channel = %channel, source = idx, count = orphaned, "nacked undelivered messages");
                }
                tracing::debug!(channel = %channel, source = idx, "upstream source ended");
            }));
        }
        drop(merge_tx);

        let result = drain_messages(&opts, &mut client, &mut merge_rx, &local).await;

        // Unblock forwarders before joining them; anything they still
        // hold gets nacked on their way out.
        local.cancel();
        for handle in forwarders {
            let _ = handle.await;
        }
        finish(&opts, merge_rx, &result);
        result
    })
}

/// Core send loop: receive → serialize → send → ack/nack.
///
/// Runs until the upstream closes (graceful completion) or the token
/// cancels. A per-message failure nacks that message and continues;
/// a connection failure ends the loop with an error.
async fn drain_messages(
    opts: &SinkOptions,
    client: &mut Box<dyn BrokerClient>,
    rx: &mut mpsc::Receiver<Message>,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(message) => forward(opts, client, message).await?,
                    None => return Ok(()),
                }
            }
            _ = token.cancelled() => return Ok(()),
        }
    }
}

/// Serialize one message and hand it to the broker client.
async fn forward(
    opts: &SinkOptions,
    client: &mut Box<dyn BrokerClient>,
    mut message: Message,
) -> Result<(), PipelineError> {
    let key = match &message.key {
        Some(key) => match opts.key_serializer.serialize(&opts.topic, key) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(channel = %opts.channel, error = %e, "key serialization failed");
                message.nack(e);
                return Ok(());
            }
        },
        None => None,
    };
    let value = match opts.value_serializer.serialize(&opts.topic, &message.value) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(channel = %opts.channel, error = %e, "value serialization failed");
            message.nack(e);
            return Ok(());
        }
    };

    let mut record = ProducerRecord::new(opts.topic.clone(), key, value);
    record.headers = std::mem::take(&mut message.headers);

    match client.send(record).await {
        Ok(metadata) => {
            message.ack(metadata);
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            tracing::error!(channel = %opts.channel, error = %e, "broker connection unusable");
            message.nack(e.clone());
            Err(PipelineError::Connection { channel: opts.channel.clone(), source: e })
        }
        Err(e) => {
            tracing::warn!(channel = %opts.channel, error = %e, "send failed");
            message.nack(e);
            Ok(())
        }
    }
}

/// Nack everything still queued in a receiver. Callers close the
/// receiver first so no new messages slip in behind the drain.
fn nack_backlog(rx: &mut mpsc::Receiver<Message>) -> usize {
    let mut count = 0usize;
    while let Ok(message) = rx.try_recv() {
        message.nack(BrokerError::send("sink stopped before broker accept"));
        count += 1;
    }
    count
}

/// Deterministic release: whatever is still queued when the sink ends
/// gets a negative acknowledgment, so no message is left hanging.
fn finish(opts: &SinkOptions, mut rx: mpsc::Receiver<Message>, result: &Result<(), PipelineError>) {
    rx.close();
    let orphaned = nack_backlog(&mut rx);
    if orphaned > 0 {
        tracing::warn!(channel = %opts.channel, count = orphaned, "nacked undelivered messages");
    }
    match result {
        Ok(()) => tracing::info!(channel = %opts.channel, "sink finished"),
        Err(e) => tracing::error!(channel = %opts.channel, error = %e, "sink failed"),
    }
}
