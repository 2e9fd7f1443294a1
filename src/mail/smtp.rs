//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::MailConfig;

use super::{MailData, MailSender, RenderedMail, SendError};

/// Sends rendered mails through an SMTP relay.
pub struct SmtpMailSender {
    config: MailConfig,
    transport: SmtpTransport,
}

impl SmtpMailSender {
    pub fn new(config: &MailConfig) -> Result<Self, SendError> {
        let builder = if config.tls {
            SmtpTransport::relay(&config.smtp_host)
                .map_err(|e| SendError::Transport(format!("SMTP relay error: {e}")))?
        } else {
            SmtpTransport::builder_dangerous(&config.smtp_host)
        };

        let builder = builder.port(config.smtp_port);
        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            config: config.clone(),
            transport: builder.build(),
        })
    }

    fn build_message(&self, rendered: &RenderedMail) -> Result<Message, SendError> {
        Message::builder()
            .from(parse_mailbox(&rendered.from)?)
            .to(parse_mailbox(&rendered.to)?)
            .subject(rendered.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body.clone())
            .map_err(|e| SendError::Build(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address.parse().map_err(|e: lettre::address::AddressError| SendError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, mail: &MailData) -> Result<(), SendError> {
        let rendered = RenderedMail::compose(mail, &self.config)?;
        let message = self.build_message(&rendered)?;
        let transport = self.transport.clone();

        // lettre's SmtpTransport is blocking
        let response = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| SendError::Transport(format!("send task failed: {e}")))?
            .map_err(|e| SendError::Transport(e.to_string()))?;

        tracing::info!(
            to = %rendered.to,
            subject = %rendered.subject,
            code = %response.code(),
            "Mail delivered via SMTP"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_mail(to: &str) -> MailData {
        MailData {
            template: Some("Hello".to_string()),
            ..MailData::to(to)
        }
    }

    #[tokio::test]
    async fn test_invalid_recipient_fails_before_connecting() {
        let sender = SmtpMailSender::new(&MailConfig::default()).unwrap();

        let result = sender.send(&template_mail("not-an-address")).await;
        assert!(matches!(result, Err(SendError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_connecting() {
        let sender = SmtpMailSender::new(&MailConfig::default()).unwrap();

        let result = sender.send(&MailData::to("foo@blubb.org")).await;
        assert!(matches!(result, Err(SendError::MissingTemplate)));
    }

    #[test]
    fn test_build_message() {
        let sender = SmtpMailSender::new(&MailConfig::default()).unwrap();
        let rendered = RenderedMail {
            to: "foo@blubb.org".to_string(),
            from: "mailer@blubb.org".to_string(),
            subject: "Hi".to_string(),
            body: "Testing 123 Bosse tut\n".to_string(),
        };

        let message = sender.build_message(&rendered).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("To: foo@blubb.org"));
        assert!(formatted.contains("Subject: Hi"));
    }
}
