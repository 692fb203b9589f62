//! Prometheus metrics endpoint.
//!
//! Exposes the idempotency counters (`idempotency_claims_total`,
//! `idempotency_replays_total`, `idempotency_conflicts_total`) next to the
//! loan counters (`loans_created_total`, `loan_approvals_total`) and the
//! `loan_approval_duration_seconds` histogram.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: renders every recorded metric in the text exposition format.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, [(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render())
}
