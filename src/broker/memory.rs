//! In-process loopback broker.
//!
//! Each exchange has at most one consumer. Messages published before the
//! consumer binds are buffered and delivered on subscribe. Published
//! messages and acknowledgments are recorded so callers can observe what
//! went over the wire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{Ack, Broker, BrokerError, Delivery, Message};

const DELIVERY_BUFFER: usize = 1024;

/// Loopback broker backed by tokio channels.
#[derive(Default)]
pub struct MemoryBroker {
    /// Bound consumers per exchange
    consumers: DashMap<String, mpsc::Sender<Delivery>>,
    /// Messages waiting for a consumer
    backlog: DashMap<String, VecDeque<Message>>,
    /// Every message ever published, per exchange
    history: DashMap<String, Vec<Message>>,
    acked: Arc<AtomicUsize>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published to `exchange`, oldest first.
    pub fn published(&self, exchange: &str) -> Vec<Message> {
        self.history
            .get(exchange)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Number of deliveries acknowledged so far.
    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    fn delivery(&self, exchange: &str, message: Message) -> Delivery {
        let acked = self.acked.clone();
        Delivery {
            exchange: exchange.to_string(),
            message,
            ack: Ack::new(async move {
                acked.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, exchange: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);

        // Publishers decide between consumer and backlog under this entry,
        // so nothing lands in the backlog after it is drained.
        let mut backlog = self.backlog.entry(exchange.to_string()).or_default();
        for message in backlog.drain(..) {
            let delivery = self.delivery(exchange, message);
            tx.try_send(delivery)
                .map_err(|e| BrokerError::Unavailable(format!("backlog overflow: {}", e)))?;
        }

        if self.consumers.insert(exchange.to_string(), tx).is_some() {
            tracing::debug!(exchange = %exchange, "Replaced existing loopback consumer");
        }
        drop(backlog);

        tracing::debug!(exchange = %exchange, "Loopback consumer bound");
        Ok(rx)
    }

    async fn publish(&self, exchange: &str, message: &Message) -> Result<(), BrokerError> {
        self.history
            .entry(exchange.to_string())
            .or_default()
            .push(message.clone());

        let consumer = {
            let mut backlog = self.backlog.entry(exchange.to_string()).or_default();
            let consumer = self
                .consumers
                .get(exchange)
                .map(|tx| tx.clone())
                .filter(|tx| !tx.is_closed());
            if consumer.is_none() {
                backlog.push_back(message.clone());
            }
            consumer
        };

        let Some(tx) = consumer else {
            tracing::debug!(exchange = %exchange, "No consumer bound, message buffered");
            return Ok(());
        };

        let delivery = self.delivery(exchange, message.clone());
        tx.send(delivery)
            .await
            .map_err(|_| BrokerError::Unavailable(format!("consumer for '{}' closed", exchange)))
    }

    fn shutdown(&self) {
        self.consumers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("foo").await.unwrap();

        broker.publish("foo", &Message::new("blubb")).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.exchange, "foo");
        assert_eq!(delivery.message.action, "blubb");
        assert_eq!(broker.acked(), 0);

        delivery.ack.ack().await;
        assert_eq!(broker.acked(), 1);
    }

    #[tokio::test]
    async fn test_backlog_delivered_on_subscribe() {
        let broker = MemoryBroker::new();
        broker.publish("foo", &Message::new("first")).await.unwrap();
        broker.publish("foo", &Message::new("second")).await.unwrap();

        let mut rx = broker.subscribe("foo").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message.action, "first");
        assert_eq!(rx.recv().await.unwrap().message.action, "second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_publish_racing_subscribe_is_not_stranded() {
        const MESSAGES: usize = 20;

        for round in 0..50 {
            let broker = Arc::new(MemoryBroker::new());
            let exchange = format!("race-{}", round);

            let publisher = {
                let broker = broker.clone();
                let exchange = exchange.clone();
                tokio::spawn(async move {
                    for i in 0..MESSAGES {
                        let message = Message::new(format!("m{}", i));
                        broker.publish(&exchange, &message).await.unwrap();
                    }
                })
            };
            let mut rx = broker.subscribe(&exchange).await.unwrap();
            publisher.await.unwrap();

            let mut received = Vec::new();
            while let Ok(delivery) = rx.try_recv() {
                received.push(delivery.message.action);
            }
            let expected: Vec<String> = (0..MESSAGES).map(|i| format!("m{}", i)).collect();
            assert_eq!(received, expected, "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_exchanges_are_isolated() {
        let broker = MemoryBroker::new();
        let mut foo = broker.subscribe("foo").await.unwrap();
        let _bar = broker.subscribe("bar").await.unwrap();

        broker.publish("bar", &Message::new("other")).await.unwrap();
        broker.publish("foo", &Message::new("mine")).await.unwrap();

        assert_eq!(foo.recv().await.unwrap().message.action, "mine");
        assert_eq!(broker.published("foo").len(), 1);
        assert_eq!(broker.published("bar").len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_consumers() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("foo").await.unwrap();

        broker.shutdown();
        assert!(rx.recv().await.is_none());
    }
}
