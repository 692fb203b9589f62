//! Health check endpoint.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub time: DateTime<Utc>,
}

/// GET /health: returns system health status and server time.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: Utc::now(),
    })
}
