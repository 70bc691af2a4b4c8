//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use booking_store::{
    BookingStore, DelayedQueue, InMemoryBookingStore, InMemoryDelayedQueue,
    PostgresBookingStore, PostgresDelayedQueue,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reservation::{
    InMemoryPaymentGateway, PaymentGateway, ReconciliationRunner, ReconciliationWorker, Sweeper,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Starts the background workers and serves HTTP until shutdown.
async fn serve<S: BookingStore + Clone + 'static>(
    config: &Config,
    store: S,
    queue: Arc<dyn DelayedQueue>,
    metrics_handle: PrometheusHandle,
) {
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(InMemoryPaymentGateway::new(config.gateway_key_secret.as_str()));
    tracing::warn!("using the in-memory payment gateway; orders are simulated and no payment is taken");

    let runner = ReconciliationRunner::new(
        queue.clone(),
        Arc::new(ReconciliationWorker::new(store.clone())),
        config.runner(),
    )
    .start();
    let sweeper = Sweeper::new(store.clone(), config.reconciliation_delay, config.sweeper()).start();

    let state = api::create_state(store, gateway, queue, config);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    runner.shutdown().await;
    sweeper.shutdown().await;
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresBookingStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let queue = Arc::new(PostgresDelayedQueue::new(pool, config.queue()));
            tracing::info!("using Postgres store and queue");
            serve(&config, store, queue, metrics_handle).await;
        }
        None => {
            let queue = Arc::new(InMemoryDelayedQueue::new(config.queue()));
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            serve(&config, InMemoryBookingStore::new(), queue, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
