use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use action_mail_service::broker::{Broker, RedisBroker};
use action_mail_service::config::Settings;
use action_mail_service::mail::create_mail_sender;
use action_mail_service::server::{create_app, AppState};
use action_mail_service::subscription::SubscriptionManager;
use action_mail_service::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.log)?;
    tracing::info!(
        subscriptions = %settings.subscriptions.path.display(),
        transport = %settings.mail.transport,
        "Configuration loaded"
    );

    // Connect broker and mail transport
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(settings.redis.clone()).await?);
    let mail = create_mail_sender(&settings.mail)?;

    // Bind exchanges
    let subscriptions = Arc::new(SubscriptionManager::new(
        settings.subscriptions.path.clone(),
        settings.resend.clone(),
        broker.clone(),
        mail,
    ));
    subscriptions.register_subscriptions().await?;

    // Create Axum app
    let app = create_app(AppState::new(subscriptions.clone()));

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    // Resends are not persisted; pending ones are lost
    let cancelled = subscriptions.shutdown().await;
    if cancelled > 0 {
        tracing::warn!(cancelled, "Pending resends dropped on shutdown");
    }
    broker.shutdown();

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
