use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use futures::FutureExt;

use crate::actions::ActionTable;
use crate::broker::{Broker, Delivery, Message};
use crate::error::{MailerError, Result};
use crate::events::{EventNotifier, MailNotSent, MailerEvent};
use crate::mail::{MailData, MailSender, SendError};
use crate::metrics::PipelineMetrics;
use crate::template::{resolve_template_path, TemplateCache};

use super::{ResendPolicy, RetryScheduler};

/// Runs one delivery through lookup, action, template and send.
///
/// Every delivery ends in exactly one terminal [`MailerEvent`]. The delivery
/// is acknowledged before that event is emitted, whatever the outcome.
pub struct MessageHandler {
    root_path: PathBuf,
    actions: Arc<ActionTable>,
    templates: Arc<TemplateCache>,
    mail: Arc<dyn MailSender>,
    broker: Arc<dyn Broker>,
    resend: ResendPolicy,
    retries: RetryScheduler,
    events: EventNotifier,
}

impl MessageHandler {
    /// Create a handler with the default resend policy and fresh cache,
    /// scheduler and notifier.
    pub fn new(
        root_path: impl Into<PathBuf>,
        actions: Arc<ActionTable>,
        mail: Arc<dyn MailSender>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            actions,
            templates: Arc::new(TemplateCache::new()),
            mail,
            broker,
            resend: ResendPolicy::default(),
            retries: RetryScheduler::new(),
            events: EventNotifier::new(),
        }
    }

    pub fn with_resend(mut self, resend: ResendPolicy) -> Self {
        self.resend = resend;
        self
    }

    /// Share a template cache with other handlers.
    pub fn with_templates(mut self, templates: Arc<TemplateCache>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_retries(mut self, retries: RetryScheduler) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_events(mut self, events: EventNotifier) -> Self {
        self.events = events;
        self
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    pub fn templates(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    /// Process a delivery to completion.
    ///
    /// Acknowledges the delivery, records metrics and emits the terminal
    /// event, in that order. The event is also returned.
    pub async fn handle(&self, delivery: Delivery) -> MailerEvent {
        let Delivery {
            exchange,
            message,
            ack,
        } = delivery;

        PipelineMetrics::record_received(&exchange);

        let event = self.process(&exchange, &message).await;

        ack.ack().await;
        PipelineMetrics::record_outcome(&exchange, &event);
        PipelineMetrics::set_template_cache_entries(self.templates.len());
        self.events.emit(event.clone());

        event
    }

    async fn process(&self, exchange: &str, message: &Message) -> MailerEvent {
        let action = message.action.as_str();

        let Some(handler) = self.actions.get(exchange, action) else {
            tracing::warn!(exchange = %exchange, action = %action, "Action not found");
            return MailerEvent::ActionNotFound(action.to_string());
        };

        let outcome = AssertUnwindSafe(handler.run(message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow!("handler panicked: {}", panic_message(&*panic)))
            });

        let mut mail = match outcome {
            Ok(mail) => mail,
            Err(e) => {
                let err = MailerError::Handler {
                    exchange: exchange.to_string(),
                    action: action.to_string(),
                    message: format!("{:#}", e),
                };
                tracing::error!(
                    exchange = %exchange,
                    action = %action,
                    error = %err,
                    "Action failed"
                );
                return MailerEvent::ActionError(Arc::new(err));
            }
        };
        mail.resend_counter = message.resend_counter;

        if mail.not_send {
            tracing::info!(
                exchange = %exchange,
                action = %action,
                info = mail.info_message.as_deref().unwrap_or(""),
                "Mail suppressed by action"
            );
            return MailerEvent::MailNotSent(MailNotSent {
                action: action.to_string(),
                exchange: exchange.to_string(),
                info_message: mail.info_message,
                message: message.clone(),
            });
        }

        if mail.template.is_none() {
            match self.load_template(exchange, action, &mail).await {
                Ok(template) => mail.template = Some(template.to_string()),
                Err(e) => {
                    tracing::error!(
                        exchange = %exchange,
                        action = %action,
                        error = %e,
                        "Template unavailable"
                    );
                    return MailerEvent::TemplateError(Arc::new(e));
                }
            }
        }

        let started = Instant::now();
        let sent = self.mail.send(&mail).await;
        PipelineMetrics::record_send_latency(started.elapsed());

        match sent {
            Ok(()) => {
                tracing::info!(
                    exchange = %exchange,
                    action = %action,
                    to = %mail.to,
                    resend_counter = mail.resend_counter,
                    "Mail sent"
                );
                MailerEvent::MailSent(mail)
            }
            Err(e) => self.send_failed(exchange, message, e),
        }
    }

    async fn load_template(
        &self,
        exchange: &str,
        action: &str,
        mail: &MailData,
    ) -> Result<Arc<str>> {
        let path = resolve_template_path(&self.root_path, exchange, action, mail)?;
        self.templates.get_or_load(&path).await
    }

    fn send_failed(&self, exchange: &str, message: &Message, error: SendError) -> MailerEvent {
        let error = Arc::new(MailerError::Send(error));

        if !self.resend.allows_resend(message.resend_counter) {
            tracing::error!(
                exchange = %exchange,
                action = %message.action,
                resend_counter = message.resend_counter,
                error = %error,
                "Failed to send mail, giving up"
            );
            return MailerEvent::FailedToSendMail(error);
        }

        let next = message.resend();
        tracing::warn!(
            exchange = %exchange,
            action = %message.action,
            resend_counter = next.resend_counter,
            delay_ms = self.resend.interval_ms,
            error = %error,
            "Failed to send mail, resend scheduled"
        );

        let resend_counter = next.resend_counter;
        self.retries.schedule(
            self.broker.clone(),
            exchange.to_string(),
            next,
            self.resend.interval(),
        );

        MailerEvent::ResendScheduled {
            exchange: exchange.to_string(),
            action: message.action.clone(),
            resend_counter,
            error,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
