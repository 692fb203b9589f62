//! HTTP API server for the loan approval service.
//!
//! Exposes loan creation, lookup, and approval. Every mutating route runs
//! behind the idempotency layer; health and metrics endpoints sit outside it.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use idempotency::{CoordinationStore, IdempotencyCoordinator};
use loan_store::LoanStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::loans::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, C>(
    state: Arc<AppState<S>>,
    coordinator: Arc<IdempotencyCoordinator<C>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    S: LoanStore + Clone + 'static,
    C: CoordinationStore + Clone + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let loans_router = Router::new()
        .route("/loans", post(routes::loans::create::<S>))
        .route("/loans/{loan_id}", get(routes::loans::get::<S>))
        .route("/loans/{loan_id}/approve", post(routes::loans::approve::<S>))
        .route_layer(axum::middleware::from_fn_with_state(
            coordinator,
            middleware::idempotency::<C>,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(loans_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
