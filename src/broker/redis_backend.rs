//! Redis list-backed broker.
//!
//! Each exchange maps to a list `<prefix>:<exchange>`. Publishing pushes a
//! JSON envelope on the left; consumers atomically move entries from the
//! right into `<prefix>:<exchange>:processing` with `BLMOVE`, and an ack
//! removes the entry from the processing list. Entries left in a processing
//! list by a crashed consumer are not redelivered.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use tokio::sync::{broadcast, mpsc};

use crate::config::RedisConfig;

use super::{Ack, Broker, BrokerError, Delivery, ExponentialBackoff, Message};

const DELIVERY_BUFFER: usize = 64;

/// Broker over Redis lists.
pub struct RedisBroker {
    client: Client,
    /// Shared connection for publishing and acknowledgments
    commands: ConnectionManager,
    config: RedisConfig,
    shutdown: broadcast::Sender<()>,
}

impl RedisBroker {
    /// Connect to Redis.
    pub async fn connect(config: RedisConfig) -> Result<Self, BrokerError> {
        let client = Client::open(config.url.as_str())?;
        let commands = ConnectionManager::new(client.clone()).await?;
        let (shutdown, _) = broadcast::channel(1);

        tracing::info!(url = %config.url, prefix = %config.prefix, "Redis broker connected");

        Ok(Self {
            client,
            commands,
            config,
            shutdown,
        })
    }

    fn queue_key(&self, exchange: &str) -> String {
        format!("{}:{}", self.config.prefix, exchange)
    }

    fn processing_key(&self, exchange: &str) -> String {
        format!("{}:{}:processing", self.config.prefix, exchange)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscribe(&self, exchange: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        // Blocking commands get their own connection so they never stall publishers.
        let connection = self.client.get_multiplexed_tokio_connection().await?;
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);

        let consumer = Consumer {
            client: self.client.clone(),
            commands: self.commands.clone(),
            exchange: exchange.to_string(),
            queue: self.queue_key(exchange),
            processing: self.processing_key(exchange),
            block_timeout: Duration::from_secs(self.config.block_timeout_secs.max(1)),
            deliveries: tx,
        };
        let shutdown = self.shutdown.subscribe();

        tokio::spawn(consumer.run(connection, shutdown));

        tracing::info!(
            exchange = %exchange,
            queue = %self.queue_key(exchange),
            "Redis consumer bound"
        );
        Ok(rx)
    }

    async fn publish(&self, exchange: &str, message: &Message) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.commands.clone();
        let _: () = conn.lpush(self.queue_key(exchange), payload).await?;

        tracing::debug!(
            exchange = %exchange,
            action = %message.action,
            resend_counter = message.resend_counter,
            "Published message"
        );
        Ok(())
    }

    fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Consume loop for a single exchange.
struct Consumer {
    client: Client,
    commands: ConnectionManager,
    exchange: String,
    queue: String,
    processing: String,
    block_timeout: Duration,
    deliveries: mpsc::Sender<Delivery>,
}

impl Consumer {
    async fn run(
        self,
        mut connection: MultiplexedConnection,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut backoff = ExponentialBackoff::new();

        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(exchange = %self.exchange, "Received shutdown signal");
                    break;
                }
                next = self.next_payload(&mut connection) => next,
            };

            match next {
                Ok(None) => continue,
                Ok(Some(payload)) => {
                    if !self.dispatch(payload).await {
                        tracing::debug!(exchange = %self.exchange, "Delivery receiver dropped");
                        break;
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        exchange = %self.exchange,
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Redis consume error, reconnecting"
                    );
                    tokio::time::sleep(delay).await;

                    match self.client.get_multiplexed_tokio_connection().await {
                        Ok(fresh) => {
                            connection = fresh;
                            backoff.reset();
                            tracing::info!(exchange = %self.exchange, "Redis consumer reconnected");
                        }
                        Err(e) => {
                            tracing::warn!(
                                exchange = %self.exchange,
                                error = %e,
                                "Reconnect failed"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn next_payload(
        &self,
        connection: &mut MultiplexedConnection,
    ) -> redis::RedisResult<Option<String>> {
        redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(self.block_timeout.as_secs_f64())
            .query_async(connection)
            .await
    }

    /// Hand a payload to the subscriber. Returns false once nobody listens.
    async fn dispatch(&self, payload: String) -> bool {
        let ack = self.ack_for(payload.clone());

        let message: Message = match serde_json::from_str(&payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    exchange = %self.exchange,
                    error = %e,
                    payload = %payload,
                    "Failed to parse broker message, dropping"
                );
                ack.ack().await;
                return true;
            }
        };

        let delivery = Delivery {
            exchange: self.exchange.clone(),
            message,
            ack,
        };

        match self.deliveries.send(delivery).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(undelivered)) => {
                // Nobody will handle it; leave the queue as we found it.
                undelivered.ack.ack().await;
                let mut conn = self.commands.clone();
                if let Ok(payload) = serde_json::to_string(&undelivered.message) {
                    let pushed: redis::RedisResult<()> = conn.rpush(&self.queue, payload).await;
                    if let Err(e) = pushed {
                        tracing::warn!(
                            exchange = %self.exchange,
                            error = %e,
                            "Failed to requeue message"
                        );
                    }
                }
                false
            }
        }
    }

    fn ack_for(&self, payload: String) -> Ack {
        let mut conn = self.commands.clone();
        let processing = self.processing.clone();
        let exchange = self.exchange.clone();

        Ack::new(async move {
            let removed: redis::RedisResult<i64> = conn.lrem(&processing, 1, payload).await;
            if let Err(e) = removed {
                tracing::warn!(exchange = %exchange, error = %e, "Failed to acknowledge message");
            }
        })
    }
}
