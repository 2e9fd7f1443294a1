//! Metrics helper for recording pipeline outcomes

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::events::MailerEvent;

use super::{
    ACTIONS_NOT_FOUND_TOTAL, ACTION_ERRORS_TOTAL, MAILS_FAILED_TOTAL, MAILS_SENT_TOTAL,
    MAILS_SUPPRESSED_TOTAL, MESSAGES_RECEIVED_TOTAL, RESENDS_PENDING, RESENDS_SCHEDULED_TOTAL,
    SEND_LATENCY, TEMPLATE_CACHE_ENTRIES, TEMPLATE_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording pipeline metrics
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a delivery received on `exchange`
    pub fn record_received(exchange: &str) {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&[exchange]).inc();
    }

    /// Record the terminal outcome of one delivery
    pub fn record_outcome(exchange: &str, event: &MailerEvent) {
        match event {
            MailerEvent::ActionNotFound(_) => ACTIONS_NOT_FOUND_TOTAL.inc(),
            MailerEvent::ActionError(_) => ACTION_ERRORS_TOTAL.inc(),
            MailerEvent::MailNotSent(_) => MAILS_SUPPRESSED_TOTAL.inc(),
            MailerEvent::TemplateError(_) => TEMPLATE_ERRORS_TOTAL.inc(),
            MailerEvent::MailSent(_) => MAILS_SENT_TOTAL.with_label_values(&[exchange]).inc(),
            MailerEvent::FailedToSendMail(_) => {
                MAILS_FAILED_TOTAL.with_label_values(&[exchange]).inc()
            }
            MailerEvent::ResendScheduled { .. } => RESENDS_SCHEDULED_TOTAL.inc(),
            MailerEvent::Subscribed => {}
        }
    }

    /// Record time spent in the mail transport
    pub fn record_send_latency(elapsed: Duration) {
        SEND_LATENCY.observe(elapsed.as_secs_f64());
    }

    /// Update the pending resend gauge
    pub fn set_pending_resends(count: usize) {
        RESENDS_PENDING.set(count as i64);
    }

    /// Update the template cache gauge
    pub fn set_template_cache_entries(count: usize) {
        TEMPLATE_CACHE_ENTRIES.set(count as i64);
    }
}
