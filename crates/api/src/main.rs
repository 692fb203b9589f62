//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use idempotency::{
    CoordinationStore, IdempotencyCoordinator, InMemoryCoordinationStore, RedisCoordinationStore,
};
use loan_store::{InMemoryLoanStore, LoanStore, PostgresLoanStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

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

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 4. Open the relational store
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await?;
            let store = PostgresLoanStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL loan store");
            with_loan_store(config, store, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory loan store");
            with_loan_store(config, InMemoryLoanStore::new(), metrics_handle).await
        }
    }
}

/// Opens the coordination store and starts serving.
async fn with_loan_store<S>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError>
where
    S: LoanStore + Clone + 'static,
{
    match config.redis_url.clone() {
        Some(url) => {
            let coordination = RedisCoordinationStore::connect(&url).await?;
            tracing::info!("using Redis coordination store");
            serve(config, store, coordination, metrics_handle).await
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory coordination store");
            serve(config, store, InMemoryCoordinationStore::new(), metrics_handle).await
        }
    }
}

async fn serve<S, C>(
    config: Config,
    store: S,
    coordination: C,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError>
where
    S: LoanStore + Clone + 'static,
    C: CoordinationStore + Clone + 'static,
{
    // 5. Build the application
    let state = Arc::new(AppState::new(store));
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        coordination,
        config.idempotency(),
    ));
    let app = api::create_app(state, coordinator, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
