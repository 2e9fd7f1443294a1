//! Mail sender that keeps rendered mails in memory.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::MailConfig;

use super::{MailData, MailSender, RenderedMail, SendError};

/// Renders mails and records them instead of delivering.
///
/// Rendering failures surface exactly as they would for a real transport,
/// so the pipeline's resend behavior can be exercised without SMTP.
pub struct MemoryMailSender {
    config: MailConfig,
    outbox: Mutex<Vec<RenderedMail>>,
}

impl MemoryMailSender {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            config: config.clone(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Mails rendered so far, oldest first.
    pub fn sent(&self) -> Vec<RenderedMail> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailSender for MemoryMailSender {
    async fn send(&self, mail: &MailData) -> Result<(), SendError> {
        let rendered = RenderedMail::compose(mail, &self.config)?;

        tracing::info!(
            to = %rendered.to,
            subject = %rendered.subject,
            bytes = rendered.body.len(),
            "Mail recorded"
        );

        self.outbox
            .lock()
            .map_err(|_| SendError::Transport("outbox lock poisoned".to_string()))?
            .push(rendered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_records_rendered_mail() {
        let sender = MemoryMailSender::new(&MailConfig::default());
        let mail = MailData {
            template: Some("Hi <%= name %>".to_string()),
            ..MailData::to("nisse@blubb.com")
                .subject("Welcome")
                .template_data(json!({"name": "Nisse"}))
        };

        sender.send(&mail).await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "nisse@blubb.com");
        assert_eq!(sent[0].subject, "Welcome");
        assert_eq!(sent[0].body, "Hi Nisse");
    }

    #[tokio::test]
    async fn test_render_failure_records_nothing() {
        let sender = MemoryMailSender::new(&MailConfig::default());
        let mail = MailData {
            template: Some("Hi <%= missing %>".to_string()),
            ..MailData::to("nisse@blubb.com")
        };

        assert!(matches!(sender.send(&mail).await, Err(SendError::Render(_))));
        assert!(sender.sent().is_empty());
    }
}
