//! Resend policy and delayed re-publishing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, Message};
use crate::metrics::PipelineMetrics;

/// How failed sends are retried.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResendPolicy {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Delay before a failed message is published again
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Resends allowed after the first attempt
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    120_000 // 2 minutes
}

fn default_max_tries() -> u32 {
    3
}

impl Default for ResendPolicy {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval_ms(),
            max_tries: default_max_tries(),
        }
    }
}

impl ResendPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether a message that has been resent `resend_counter` times may be
    /// resent once more.
    pub fn allows_resend(&self, resend_counter: u32) -> bool {
        self.enabled && self.max_tries > resend_counter
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Timers that re-publish failed messages.
///
/// Each resend runs in its own task. Handles are kept until the task
/// finishes so pending resends can be counted and cancelled.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    pending: Arc<DashMap<Uuid, JoinHandle<()>>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `message` to `exchange` after `delay`.
    ///
    /// Publish failures are logged and otherwise dropped.
    pub fn schedule(
        &self,
        broker: Arc<dyn Broker>,
        exchange: String,
        message: Message,
        delay: Duration,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let pending = self.pending.clone();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // Never remove our entry before it was inserted
            let _ = registered_rx.await;
            tokio::time::sleep(delay).await;

            match broker.publish(&exchange, &message).await {
                Ok(()) => tracing::debug!(
                    exchange = %exchange,
                    action = %message.action,
                    resend_counter = message.resend_counter,
                    "Resend published"
                ),
                Err(e) => tracing::warn!(
                    exchange = %exchange,
                    action = %message.action,
                    resend_counter = message.resend_counter,
                    error = %e,
                    "Failed to publish resend"
                ),
            }

            pending.remove(&id);
            PipelineMetrics::set_pending_resends(pending.len());
        });

        self.pending.insert(id, handle);
        let _ = registered_tx.send(());
        PipelineMetrics::set_pending_resends(self.pending.len());

        id
    }

    /// Number of resends waiting to fire.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Abort every pending resend. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;

        for id in ids {
            if let Some((_, handle)) = self.pending.remove(&id) {
                handle.abort();
                cancelled += 1;
            }
        }

        PipelineMetrics::set_pending_resends(0);
        cancelled
    }
}
