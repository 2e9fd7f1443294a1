use std::path::PathBuf;

use thiserror::Error;

use crate::broker::BrokerError;
use crate::mail::SendError;

/// Errors raised while registering subscriptions or handling a message.
///
/// Per-message errors never escape the pipeline; they are converted into
/// events. Registration errors are returned to the caller of
/// `SubscriptionManager::register_subscriptions`.
#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to read directory '{}': {source}", path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load action handler '{}': {reason}", path.display())]
    ActionLoad { path: PathBuf, reason: String },

    #[error("Template not found: {}", path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("Failed to read template '{}': {source}", path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error running subscription '{exchange}/{action}', err: {message}")]
    Handler {
        exchange: String,
        action: String,
        message: String,
    },

    #[error("Failed to send mail: {0}")]
    Send(#[from] SendError),

    #[error("Subscription registration already in progress")]
    RegistrationInProgress,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub type Result<T> = std::result::Result<T, MailerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_message() {
        let err = MailerError::Handler {
            exchange: "foo".to_string(),
            action: "blubb".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error running subscription 'foo/blubb', err: boom"
        );
    }

    #[test]
    fn test_template_not_found_names_path() {
        let err = MailerError::TemplateNotFound {
            path: PathBuf::from("/tmp/foo/bar.tmpl"),
        };
        assert!(err.to_string().contains("/tmp/foo/bar.tmpl"));
    }
}
