use std::sync::Arc;
use std::time::Instant;

use crate::subscription::SubscriptionManager;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<SubscriptionManager>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            subscriptions,
            start_time: Instant::now(),
        }
    }
}
