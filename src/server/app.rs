use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::api_routes;

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::MailConfig;
    use crate::mail::MemoryMailSender;
    use crate::pipeline::ResendPolicy;
    use crate::subscription::SubscriptionManager;

    fn state() -> AppState {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/subscriptions");
        AppState::new(Arc::new(SubscriptionManager::new(
            root,
            ResendPolicy::default(),
            Arc::new(MemoryBroker::new()),
            Arc::new(MemoryMailSender::new(&MailConfig::default())),
        )))
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_before_registration() {
        let health = get_json(create_app(state()), "/health").await;

        assert_eq!(health["status"], "degraded");
        assert_eq!(health["subscription_state"], "unsubscribed");
        assert_eq!(health["exchanges"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_health_when_subscribed() {
        let state = state();
        state.subscriptions.register_subscriptions().await.unwrap();

        let health = get_json(create_app(state), "/health").await;

        assert_eq!(health["status"], "healthy");
        assert_eq!(health["subscription_state"], "subscribed");
        assert_eq!(health["exchanges"], serde_json::json!(["foo", "testExchange"]));
        assert_eq!(health["pending_resends"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = create_app(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("mailer_resends_pending"));
    }
}
