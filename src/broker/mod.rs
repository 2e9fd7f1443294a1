//! Message broker abstraction.
//!
//! The pipeline only needs two capabilities from a broker: consuming the
//! deliveries of an exchange (each carrying a one-shot [`Ack`]) and
//! publishing a new message to an exchange. Two implementations exist:
//!
//! - `MemoryBroker`: in-process loopback, used for local runs and tests
//! - `RedisBroker`: reliable queue on Redis lists (`BLMOVE` + `LREM`)

mod backoff;
mod memory;
mod redis_backend;

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use self::backoff::{BackoffConfig, ExponentialBackoff};
pub use self::memory::MemoryBroker;
pub use self::redis_backend::RedisBroker;

/// Errors that can occur while talking to a broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker refused the operation
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Message envelope exchanged over the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Action name within the exchange
    pub action: String,
    /// Opaque payload handed to the action handler
    #[serde(default)]
    pub params: serde_json::Value,
    /// Number of resends that produced this envelope
    #[serde(default)]
    pub resend_counter: u32,
}

impl Message {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: serde_json::Value::Null,
            resend_counter: 0,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Envelope for the next resend of this message.
    pub fn resend(&self) -> Self {
        Self {
            action: self.action.clone(),
            params: self.params.clone(),
            resend_counter: self.resend_counter + 1,
        }
    }
}

/// Acknowledgment token for a single delivery.
///
/// `ack` consumes the token, so a delivery can be acknowledged at most once.
pub struct Ack {
    pending: Option<BoxFuture<'static, ()>>,
}

impl Ack {
    /// Create a token that runs `on_ack` when acknowledged.
    pub fn new<F>(on_ack: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            pending: Some(Box::pin(on_ack)),
        }
    }

    /// Token with nothing to do on acknowledgment.
    pub fn noop() -> Self {
        Self::new(async {})
    }

    /// Acknowledge the delivery.
    pub async fn ack(mut self) {
        if let Some(on_ack) = self.pending.take() {
            on_ack.await;
        }
    }
}

impl Drop for Ack {
    fn drop(&mut self) {
        if self.pending.is_some() {
            tracing::warn!("Delivery dropped without acknowledgment");
        }
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack")
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// A message delivered from an exchange, awaiting acknowledgment.
#[derive(Debug)]
pub struct Delivery {
    pub exchange: String,
    pub message: Message,
    pub ack: Ack,
}

/// Message broker used by the subscription manager and resend scheduler.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Bind a consumer to `exchange`.
    ///
    /// Resolves once the binding is ready; deliveries arrive on the returned
    /// channel until the broker shuts down or the receiver is dropped.
    async fn subscribe(&self, exchange: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError>;

    /// Publish a message to `exchange`.
    async fn publish(&self, exchange: &str, message: &Message) -> Result<(), BrokerError>;

    /// Stop all consumers.
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_parse_minimal_message() {
        let message: Message = serde_json::from_str(r#"{"action": "blubb"}"#).unwrap();
        assert_eq!(message.action, "blubb");
        assert!(message.params.is_null());
        assert_eq!(message.resend_counter, 0);
    }

    #[test]
    fn test_message_uses_camel_case() {
        let message = Message::new("blubb").resend();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["resendCounter"], 1);
    }

    #[test]
    fn test_resend_keeps_action_and_params() {
        let message = Message::new("welcome").with_params(serde_json::json!({"user": "bosse"}));
        let first = message.resend();
        let second = first.resend();

        assert_eq!(second.action, "welcome");
        assert_eq!(second.params["user"], "bosse");
        assert_eq!(second.resend_counter, 2);
    }

    #[tokio::test]
    async fn test_ack_runs_callback() {
        let acked = Arc::new(AtomicBool::new(false));
        let flag = acked.clone();
        let ack = Ack::new(async move {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!acked.load(Ordering::SeqCst));
        ack.ack().await;
        assert!(acked.load(Ordering::SeqCst));
    }
}
