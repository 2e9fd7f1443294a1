//! Prometheus metrics for the mail service.
//!
//! - Message metrics (received per exchange, outcome counters)
//! - Mail metrics (sent, failed, suppressed, send latency)
//! - Resend metrics (scheduled, pending timers)
//! - Template cache size

mod helpers;

pub use helpers::{encode_metrics, PipelineMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mailer";

lazy_static! {
    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Deliveries received from the broker, by exchange
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total broker deliveries received",
        &["exchange"]
    ).unwrap();

    /// Deliveries whose action has no handler
    pub static ref ACTIONS_NOT_FOUND_TOTAL: IntCounter = register_int_counter!(
        format!("{}_actions_not_found_total", METRIC_PREFIX),
        "Total deliveries without a registered action handler"
    ).unwrap();

    /// Action handler failures
    pub static ref ACTION_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_action_errors_total", METRIC_PREFIX),
        "Total action handler failures"
    ).unwrap();

    /// Template resolution or read failures
    pub static ref TEMPLATE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_template_errors_total", METRIC_PREFIX),
        "Total template resolution or read failures"
    ).unwrap();

    // ============================================================================
    // Mail Metrics
    // ============================================================================

    /// Mails handed to the transport, by exchange
    pub static ref MAILS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_mails_sent_total", METRIC_PREFIX),
        "Total mails sent",
        &["exchange"]
    ).unwrap();

    /// Mails given up on after all resends, by exchange
    pub static ref MAILS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_mails_failed_total", METRIC_PREFIX),
        "Total mails that failed with no resend left",
        &["exchange"]
    ).unwrap();

    /// Mails suppressed by their handler
    pub static ref MAILS_SUPPRESSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_mails_suppressed_total", METRIC_PREFIX),
        "Total mails suppressed by their action handler"
    ).unwrap();

    /// Time spent in the mail transport
    pub static ref SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_send_latency_seconds", METRIC_PREFIX),
        "Mail transport send latency in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Resend Metrics
    // ============================================================================

    /// Resends scheduled after a send failure
    pub static ref RESENDS_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_resends_scheduled_total", METRIC_PREFIX),
        "Total resends scheduled"
    ).unwrap();

    /// Resend timers not yet fired
    pub static ref RESENDS_PENDING: IntGauge = register_int_gauge!(
        format!("{}_resends_pending", METRIC_PREFIX),
        "Resend timers waiting to fire"
    ).unwrap();

    // ============================================================================
    // Template Metrics
    // ============================================================================

    /// Templates held in the cache
    pub static ref TEMPLATE_CACHE_ENTRIES: IntGauge = register_int_gauge!(
        format!("{}_template_cache_entries", METRIC_PREFIX),
        "Number of cached template sources"
    ).unwrap();
}
