use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::BrokerError;

/// Liveness/readiness flags of one channel.
///
/// Liveness starts true and is flipped exactly once, by the first
/// fatal decode failure; it stays false until process restart.
/// Readiness tracks whether the channel's pipeline task is running.
pub struct ChannelHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Default for ChannelHealth {
    fn default() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }
}

impl ChannelHealth {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Flip liveness to false. Compare-and-set: the first failure wins,
    /// later calls are no-ops so concurrent partition failures cannot
    /// overwrite the original cause. Returns whether this call flipped.
    pub fn mark_failed(&self, cause: &BrokerError) -> bool {
        let flipped = self
            .live
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if flipped {
            if let Ok(mut guard) = self.last_error.lock() {
                *guard = Some(cause.to_string());
            }
        }
        flipped
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|g| g.clone())
    }
}

/// Point-in-time health report of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub channel: String,
    pub live: bool,
    pub ready: bool,
    pub last_error: Option<String>,
}

/// All channel health flags, keyed by channel name.
#[derive(Default)]
pub struct HealthRegistry {
    channels: RwLock<HashMap<String, Arc<ChannelHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: impl Into<String>) -> Arc<ChannelHealth> {
        let channel = channel.into();
        let mut guard = match self.channels.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("health registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.entry(channel).or_default().clone()
    }

    pub fn get(&self, channel: &str) -> Option<Arc<ChannelHealth>> {
        let guard = match self.channels.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(channel).cloned()
    }

    /// Report of every registered channel, for external monitoring.
    pub fn snapshot(&self) -> Vec<HealthStatus> {
        let guard = match self.channels.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut report: Vec<HealthStatus> = guard
            .iter()
            .map(|(name, health)| HealthStatus {
                channel: name.clone(),
                live: health.is_live(),
                ready: health.is_ready(),
                last_error: health.last_error(),
            })
            .collect();
        report.sort_by(|a, b| a.channel.cmp(&b.channel));
        report
    }
}
