//! Lifecycle events of the mail pipeline.
//!
//! Observers subscribe to a broadcast of [`MailerEvent`]s. Dropping the
//! listener unsubscribes it. Events emitted while nobody listens are lost.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broker::Message;
use crate::error::MailerError;
use crate::mail::MailData;

const EVENT_BUFFER: usize = 256;

/// Payload of the `mailNotSent` event.
#[derive(Debug, Clone)]
pub struct MailNotSent {
    pub action: String,
    pub exchange: String,
    pub info_message: Option<String>,
    pub message: Message,
}

/// Outcome or lifecycle event.
#[derive(Debug, Clone)]
pub enum MailerEvent {
    /// All exchange bindings are established
    Subscribed,
    /// No handler for the named action
    ActionNotFound(String),
    /// The handler failed
    ActionError(Arc<MailerError>),
    /// The handler asked not to send
    MailNotSent(MailNotSent),
    /// Sending failed and no resend is left
    FailedToSendMail(Arc<MailerError>),
    /// Mail handed to the transport successfully
    MailSent(MailData),
    /// Sending failed and a resend was scheduled
    ResendScheduled {
        exchange: String,
        action: String,
        resend_counter: u32,
        error: Arc<MailerError>,
    },
    /// The template could not be resolved or read
    TemplateError(Arc<MailerError>),
}

impl MailerEvent {
    /// Event name as seen by observers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::ActionNotFound(_) => "actionNotFound",
            Self::ActionError(_) => "actionError",
            Self::MailNotSent(_) => "mailNotSent",
            Self::FailedToSendMail(_) => "failedToSendMail",
            Self::MailSent(_) => "mailSent",
            Self::ResendScheduled { .. } => "resendScheduled",
            Self::TemplateError(_) => "templateError",
        }
    }
}

/// Fan-out of pipeline events to any number of listeners.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    sender: broadcast::Sender<MailerEvent>,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Register a listener for all events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MailerEvent> {
        self.sender.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn emit(&self, event: MailerEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(listeners) => tracing::trace!(event = name, listeners, "Event emitted"),
            Err(_) => tracing::trace!(event = name, "Event emitted without listeners"),
        }
    }

    /// Wait for the next event matching `predicate`.
    ///
    /// Only events emitted after the call are considered. Returns `None` if
    /// the notifier is gone.
    pub async fn once<F>(&self, predicate: F) -> Option<MailerEvent>
    where
        F: Fn(&MailerEvent) -> bool,
    {
        next_matching(&mut self.subscribe(), predicate).await
    }
}

/// Receive from `listener` until an event matches `predicate`.
///
/// Lagged listeners skip the missed events and keep going.
pub async fn next_matching<F>(
    listener: &mut broadcast::Receiver<MailerEvent>,
    predicate: F,
) -> Option<MailerEvent>
where
    F: Fn(&MailerEvent) -> bool,
{
    loop {
        match listener.recv().await {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let notifier = EventNotifier::new();
        let mut listener = notifier.subscribe();

        notifier.emit(MailerEvent::ActionNotFound("nope".to_string()));

        match listener.recv().await.unwrap() {
            MailerEvent::ActionNotFound(action) => assert_eq!(action, "nope"),
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[test]
    fn test_listener_count_tracks_drops() {
        let notifier = EventNotifier::new();
        assert_eq!(notifier.listener_count(), 0);

        let first = notifier.subscribe();
        let second = notifier.subscribe();
        assert_eq!(notifier.listener_count(), 2);

        drop(first);
        assert_eq!(notifier.listener_count(), 1);
        drop(second);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_emit_without_listeners() {
        let notifier = EventNotifier::new();
        notifier.emit(MailerEvent::Subscribed);
    }

    #[tokio::test]
    async fn test_once_skips_other_events() {
        let notifier = EventNotifier::new();
        let waiter = {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier
                    .once(|event| matches!(event, MailerEvent::Subscribed))
                    .await
            })
        };

        // Let the waiter register before emitting
        while notifier.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        notifier.emit(MailerEvent::ActionNotFound("nope".to_string()));
        notifier.emit(MailerEvent::Subscribed);

        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.name(), "subscribed");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(MailerEvent::Subscribed.name(), "subscribed");
        assert_eq!(MailerEvent::MailSent(MailData::default()).name(), "mailSent");
        assert_eq!(
            MailerEvent::FailedToSendMail(Arc::new(MailerError::RegistrationInProgress)).name(),
            "failedToSendMail"
        );
    }
}
