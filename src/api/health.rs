//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;
use crate::subscription::SubscriptionState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub subscription_state: SubscriptionState,
    pub exchanges: Vec<String>,
    pub pending_resends: usize,
    pub event_listeners: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let subscriptions = &state.subscriptions;
    let subscription_state = subscriptions.state();

    let status = if subscription_state == SubscriptionState::Subscribed {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        subscription_state,
        exchanges: subscriptions.exchanges().await,
        pending_resends: subscriptions.pending_resends(),
        event_listeners: subscriptions.events().listener_count(),
    })
}
