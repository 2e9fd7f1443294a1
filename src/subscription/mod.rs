//! Binding of exchanges to broker consumers.
//!
//! [`SubscriptionManager::register_subscriptions`] scans the subscriptions
//! root for handlers, opens one broker binding per exchange and routes every
//! delivery through a shared [`MessageHandler`]. Registration runs at most
//! once at a time; a successful registration is final.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::actions::{load_actions, ActionHandler, ActionTable};
use crate::broker::{Broker, Delivery};
use crate::error::{MailerError, Result};
use crate::events::{EventNotifier, MailerEvent};
use crate::mail::MailSender;
use crate::pipeline::{MessageHandler, ResendPolicy, RetryScheduler};
use crate::template::TemplateCache;

/// Registration progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Owns the exchange bindings and the state shared by all deliveries.
pub struct SubscriptionManager {
    root_path: PathBuf,
    resend: ResendPolicy,
    broker: Arc<dyn Broker>,
    mail: Arc<dyn MailSender>,
    /// In-code handlers, merged over the scanned ones
    registered: ActionTable,
    state: watch::Sender<SubscriptionState>,
    events: EventNotifier,
    templates: Arc<TemplateCache>,
    retries: RetryScheduler,
    actions: RwLock<Arc<ActionTable>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(
        root_path: impl Into<PathBuf>,
        resend: ResendPolicy,
        broker: Arc<dyn Broker>,
        mail: Arc<dyn MailSender>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Unsubscribed);

        Self {
            root_path: root_path.into(),
            resend,
            broker,
            mail,
            registered: ActionTable::new(),
            state,
            events: EventNotifier::new(),
            templates: Arc::new(TemplateCache::new()),
            retries: RetryScheduler::new(),
            actions: RwLock::new(Arc::new(ActionTable::new())),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Bind an in-code handler. It replaces a scanned handler of the same
    /// name.
    pub fn with_action(
        mut self,
        exchange: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.registered.insert(exchange, action, handler);
        self
    }

    /// Load handlers and bind every exchange.
    ///
    /// Returns immediately if already subscribed and fails with
    /// [`MailerError::RegistrationInProgress`] while another registration
    /// runs. A missing subscriptions root is not an error. Listing and
    /// binding errors are returned and leave the manager unsubscribed.
    pub async fn register_subscriptions(&self) -> Result<()> {
        let mut already_subscribed = false;
        let started = self.state.send_if_modified(|state| match *state {
            SubscriptionState::Unsubscribed => {
                *state = SubscriptionState::Subscribing;
                true
            }
            SubscriptionState::Subscribed => {
                already_subscribed = true;
                false
            }
            SubscriptionState::Subscribing => false,
        });

        if already_subscribed {
            return Ok(());
        }
        if !started {
            return Err(MailerError::RegistrationInProgress);
        }

        let mut guard = RegistrationGuard {
            state: &self.state,
            finished: false,
        };

        let exchanges = self.bind_exchanges().await.inspect_err(|e| {
            tracing::error!(
                root = %self.root_path.display(),
                error = %e,
                "Subscription registration failed"
            );
        })?;

        guard.finished = true;
        self.state.send_replace(SubscriptionState::Subscribed);
        tracing::info!(exchanges, "Subscriptions registered");
        self.events.emit(MailerEvent::Subscribed);

        Ok(())
    }

    async fn bind_exchanges(&self) -> Result<usize> {
        let root_exists = tokio::fs::try_exists(&self.root_path)
            .await
            .map_err(|source| MailerError::DirectoryRead {
                path: self.root_path.clone(),
                source,
            })?;

        let mut table = if root_exists {
            load_actions(&self.root_path).await?
        } else {
            tracing::info!(
                root = %self.root_path.display(),
                "Subscriptions directory not found, no actions loaded"
            );
            ActionTable::new()
        };
        table.merge(&self.registered);
        let table = Arc::new(table);

        let handler = Arc::new(
            MessageHandler::new(
                self.root_path.clone(),
                table.clone(),
                self.mail.clone(),
                self.broker.clone(),
            )
            .with_resend(self.resend.clone())
            .with_templates(self.templates.clone())
            .with_retries(self.retries.clone())
            .with_events(self.events.clone()),
        );

        let exchanges = table.exchanges();
        let receivers = try_join_all(
            exchanges
                .iter()
                .map(|exchange| self.broker.subscribe(exchange)),
        )
        .await?;

        let mut consumers = self.consumers.lock().await;
        for (exchange, deliveries) in exchanges.iter().zip(receivers) {
            tracing::debug!(
                exchange = %exchange,
                actions = ?table.actions(exchange),
                "Exchange bound"
            );
            consumers.push(tokio::spawn(consume(
                exchange.clone(),
                deliveries,
                handler.clone(),
            )));
        }

        *self.actions.write().await = table;
        Ok(exchanges.len())
    }

    /// Wait until the manager is subscribed.
    pub async fn ready(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == SubscriptionState::Subscribed)
            .await;
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    /// Exchanges bound by the last successful registration, sorted.
    pub async fn exchanges(&self) -> Vec<String> {
        self.actions.read().await.exchanges()
    }

    pub fn pending_resends(&self) -> usize {
        self.retries.pending()
    }

    /// Stop all consumers and cancel pending resends.
    ///
    /// Returns the number of resends that were cancelled. Deliveries already
    /// being handled run to completion.
    pub async fn shutdown(&self) -> usize {
        let consumers: Vec<JoinHandle<()>> = self.consumers.lock().await.drain(..).collect();
        for consumer in &consumers {
            consumer.abort();
        }

        let cancelled = self.retries.cancel_all();
        self.state.send_replace(SubscriptionState::Unsubscribed);

        tracing::info!(
            consumers = consumers.len(),
            cancelled_resends = cancelled,
            "Subscriptions stopped"
        );
        cancelled
    }
}

/// Resets the state if registration does not complete.
struct RegistrationGuard<'a> {
    state: &'a watch::Sender<SubscriptionState>,
    finished: bool,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.send_replace(SubscriptionState::Unsubscribed);
        }
    }
}

async fn consume(
    exchange: String,
    mut deliveries: mpsc::Receiver<Delivery>,
    handler: Arc<MessageHandler>,
) {
    while let Some(delivery) = deliveries.recv().await {
        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(delivery).await;
        });
    }

    tracing::debug!(exchange = %exchange, "Consumer stopped");
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::actions::action_fn;
    use crate::broker::{Message, MemoryBroker};
    use crate::config::MailConfig;
    use crate::mail::{MailData, MemoryMailSender};

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/subscriptions")
    }

    fn manager(root: PathBuf) -> SubscriptionManager {
        SubscriptionManager::new(
            root,
            ResendPolicy::disabled(),
            Arc::new(MemoryBroker::new()),
            Arc::new(MemoryMailSender::new(&MailConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_register_binds_fixture_exchanges() {
        let manager = manager(fixtures());
        assert_eq!(manager.state(), SubscriptionState::Unsubscribed);

        manager.register_subscriptions().await.unwrap();

        assert_eq!(manager.state(), SubscriptionState::Subscribed);
        assert_eq!(manager.exchanges().await, vec!["foo", "testExchange"]);
    }

    #[tokio::test]
    async fn test_register_twice_is_noop() {
        let manager = manager(fixtures());
        manager.register_subscriptions().await.unwrap();
        manager.register_subscriptions().await.unwrap();
        assert_eq!(manager.state(), SubscriptionState::Subscribed);
    }

    #[tokio::test]
    async fn test_missing_root_subscribes_with_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path().join("nope"));

        manager.register_subscriptions().await.unwrap();

        assert_eq!(manager.state(), SubscriptionState::Subscribed);
        assert!(manager.exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_root_fails_registration() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, "").unwrap();
        let manager = manager(file.join("subscriptions"));
        let mut listener = manager.events().subscribe();

        let err = manager.register_subscriptions().await.unwrap_err();

        assert!(matches!(err, MailerError::DirectoryRead { .. }));
        assert_eq!(manager.state(), SubscriptionState::Unsubscribed);
        assert!(listener.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_registration_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("orders")).unwrap();
        std::fs::write(dir.path().join("orders/shipped.json"), "not json").unwrap();
        let manager = manager(dir.path().to_path_buf());

        let err = manager.register_subscriptions().await.unwrap_err();

        assert!(matches!(err, MailerError::ActionLoad { .. }));
        assert_eq!(manager.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_in_code_action_is_bound() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path().to_path_buf()).with_action(
            "ops",
            "ping",
            action_fn(|_message: Message| async move {
                Ok::<_, anyhow::Error>(MailData::to("ops@blubb.org"))
            }),
        );

        manager.register_subscriptions().await.unwrap();
        assert_eq!(manager.exchanges().await, vec!["ops"]);
    }

    #[tokio::test]
    async fn test_ready_resolves_after_registration() {
        let manager = Arc::new(manager(fixtures()));

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ready().await })
        };
        manager.register_subscriptions().await.unwrap();

        waiter.await.unwrap();
        // Already subscribed: resolves at once
        manager.ready().await;
    }

    #[tokio::test]
    async fn test_shutdown_resets_state() {
        let manager = manager(fixtures());
        manager.register_subscriptions().await.unwrap();

        assert_eq!(manager.shutdown().await, 0);
        assert_eq!(manager.state(), SubscriptionState::Unsubscribed);
    }
}
