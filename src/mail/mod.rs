//! Mail records and mail transports.
//!
//! Action handlers produce a [`MailData`]; the pipeline attaches the raw
//! template text and hands the record to a [`MailSender`], which renders the
//! template with `templateData` and delivers the result.
//!
//! - `SmtpMailSender`: SMTP delivery via lettre
//! - `MemoryMailSender`: renders and records mails without network I/O
//!
//! Use `create_mail_sender()` to build the transport named in configuration.

mod memory;
mod smtp;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MailConfig;
use crate::template::{render_template, RenderError};

pub use memory::MemoryMailSender;
pub use smtp::SmtpMailSender;

/// Errors raised by mail transports.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Mail has no template attached")]
    MissingTemplate,

    #[error("Template rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown mail transport: {0}")]
    UnknownTransport(String),
}

/// The mail a handler wants sent for one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailData {
    /// Recipient address
    #[serde(default)]
    pub to: String,

    /// Sender address, transport default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Raw template text. A handler may set it directly; otherwise the
    /// pipeline loads it from the resolved template path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Explicit template file, overriding `<root>/<exchange>/<action>.tmpl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,

    /// Placeholder values for rendering
    #[serde(default)]
    pub template_data: serde_json::Map<String, serde_json::Value>,

    /// Suppress sending entirely
    #[serde(default)]
    pub not_send: bool,

    /// Reported with the `mailNotSent` event when sending is suppressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_message: Option<String>,

    #[serde(default)]
    pub resend_counter: u32,
}

impl MailData {
    pub fn to(recipient: impl Into<String>) -> Self {
        Self {
            to: recipient.into(),
            ..Self::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn template_data(mut self, data: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = data {
            self.template_data = map;
        }
        self
    }
}

/// A mail after rendering, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl RenderedMail {
    /// Render `mail`, filling sender and subject from the transport defaults.
    pub fn compose(mail: &MailData, config: &MailConfig) -> Result<Self, SendError> {
        let template = mail.template.as_deref().ok_or(SendError::MissingTemplate)?;
        let body = render_template(template, &mail.template_data)?;

        Ok(Self {
            to: mail.to.clone(),
            from: mail.from.clone().unwrap_or_else(|| config.from.clone()),
            subject: mail
                .subject
                .clone()
                .unwrap_or_else(|| config.default_subject.clone()),
            body,
        })
    }
}

/// Mail delivery capability used by the pipeline.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Render `mail.template` with `mail.template_data` and deliver it.
    async fn send(&self, mail: &MailData) -> Result<(), SendError>;
}

/// Create the mail transport named by `config.transport`.
///
/// - `"smtp"`: `SmtpMailSender`
/// - `"memory"`: `MemoryMailSender`
pub fn create_mail_sender(config: &MailConfig) -> Result<Arc<dyn MailSender>, SendError> {
    match config.transport.as_str() {
        "smtp" => {
            tracing::info!(
                transport = "smtp",
                host = %config.smtp_host,
                port = config.smtp_port,
                tls = config.tls,
                "Creating SMTP mail sender"
            );
            Ok(Arc::new(SmtpMailSender::new(config)?))
        }
        "memory" => {
            tracing::info!(transport = "memory", "Creating memory mail sender");
            Ok(Arc::new(MemoryMailSender::new(config)))
        }
        other => Err(SendError::UnknownTransport(other.to_string())),
    }
}
