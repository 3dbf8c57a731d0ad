use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ridehub_realtime_service::config::Settings;
use ridehub_realtime_service::delivery::{
    HandlerRegistry, PushDeliveryHandler, SocketDeliveryHandler, WorkerPool,
};
use ridehub_realtime_service::events::PUSH_NOTIFICATION;
use ridehub_realtime_service::matching::create_ride_store;
use ridehub_realtime_service::push::LoggingPushSender;
use ridehub_realtime_service::server::{create_app, AppState};
use ridehub_realtime_service::tasks::LeaseSweeper;
use ridehub_realtime_service::triggers::RedisIntentSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    let store = create_ride_store(&settings.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create ride store: {e}"))?;

    let state = AppState::new(settings.clone(), store);
    tracing::info!("Application state initialized");

    // Delivery worker pool: live-socket fallback plus the push handler
    let mut handlers = HandlerRegistry::new(Arc::new(SocketDeliveryHandler::new(
        state.registry.clone(),
    )));
    handlers.register(
        PUSH_NOTIFICATION,
        Arc::new(PushDeliveryHandler::new(Arc::new(LoggingPushSender))),
    );
    let pool = WorkerPool::new(state.broker.clone(), Arc::new(handlers));
    let worker_handles = pool.spawn(settings.delivery.workers);
    tracing::info!(workers = settings.delivery.workers, "Delivery workers started");

    // Redis delivery trigger
    let redis_subscriber = Arc::new(RedisIntentSubscriber::new(
        settings.redis.clone(),
        state.broker.clone(),
    ));
    let shutdown_signal = redis_subscriber.shutdown_signal();

    let redis_subscriber_clone = redis_subscriber.clone();
    let redis_handle = tokio::spawn(async move {
        if let Err(e) = redis_subscriber_clone.start().await {
            tracing::error!(error = %e, "Redis delivery trigger failed");
        }
    });

    // Lease sweeper
    let sweeper = LeaseSweeper::new(
        &settings.delivery,
        state.broker.clone(),
        shutdown_signal.subscribe(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    let broker = state.broker.clone();
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_signal))
        .await?;

    // Stop accepting intents and let the workers drain out
    broker.close();

    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(redis_handle, sweeper_handle);
    for handle in worker_handles {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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

    let _ = shutdown_tx.send(());
}
