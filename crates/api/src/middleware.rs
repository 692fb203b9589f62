//! Idempotency layer for mutating routes.
//!
//! Installed with `route_layer` so that [`MatchedPath`] carries the route
//! template (`/loans/{loan_id}/approve`) rather than the expanded path.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode, response};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use idempotency::{
    BORROWER_ID_HEADER, Capture, CapturedResponse, CoordinationStore, IdempotencyCoordinator,
    IdempotencyError, Outcome, REQUEST_AT_HEADER, REQUEST_ID_HEADER, RequestIdentity,
    is_bypassed,
};

use crate::error::ApiError;

/// Largest request or response body the layer buffers.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// A downstream response held in memory so it can be both recorded and sent.
pub struct BufferedResponse {
    parts: response::Parts,
    body: Bytes,
}

impl BufferedResponse {
    /// Drains the response body.
    ///
    /// A body that fails to drain becomes a 500, and that is what gets recorded.
    pub async fn buffer(response: Response) -> Self {
        let (parts, body) = response.into_parts();
        match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => Self { parts, body },
            Err(err) => {
                tracing::error!(error = %err, "failed to buffer handler response");
                let (mut parts, _) = StatusCode::INTERNAL_SERVER_ERROR
                    .into_response()
                    .into_parts();
                parts
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                let body = Bytes::from_static(b"{\"error\":\"failed to read response body\"}");
                Self { parts, body }
            }
        }
    }
}

impl Capture for BufferedResponse {
    fn capture(&self) -> CapturedResponse {
        CapturedResponse::new(self.parts.status.as_u16(), self.body.to_vec())
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        Response::from_parts(self.parts, Body::from(self.body))
    }
}

/// Rebuilds a recorded response. Replays are always sent as JSON.
pub fn replay(captured: CapturedResponse) -> Response {
    let status =
        StatusCode::from_u16(captured.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, captured.body).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Runs each mutating request through the coordinator.
///
/// Safe methods pass straight through. Everything else must carry valid
/// identity headers; the downstream handler then runs at most once per
/// fingerprint and retries receive the recorded response.
pub async fn idempotency<C>(
    State(coordinator): State<Arc<IdempotencyCoordinator<C>>>,
    request: Request,
    next: Next,
) -> Response
where
    C: CoordinationStore + Clone + 'static,
{
    if is_bypassed(request.method().as_str()) {
        return next.run(request).await;
    }

    let identity = match identify(&coordinator, request.headers()) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::debug!(error = %err, "rejected idempotency headers");
            return ApiError::from(err).into_response();
        }
    };

    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return ApiError::BadRequest("invalid body".to_string()).into_response(),
    };
    let request = Request::from_parts(parts, Body::from(body.clone()));

    let outcome = coordinator
        .execute(&method, &route, &identity, &body, move || async move {
            BufferedResponse::buffer(next.run(request).await).await
        })
        .await;

    match outcome {
        Ok(Outcome::Executed(response)) => response.into_response(),
        Ok(Outcome::Replayed(captured)) => replay(captured),
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn identify<C>(
    coordinator: &IdempotencyCoordinator<C>,
    headers: &HeaderMap,
) -> idempotency::Result<RequestIdentity>
where
    C: CoordinationStore + Clone + 'static,
{
    coordinator.identify(
        header(headers, REQUEST_ID_HEADER)?,
        header(headers, REQUEST_AT_HEADER)?,
        header(headers, BORROWER_ID_HEADER)?,
    )
}

/// Reads a header as text; a value that is not UTF-8 is malformed, not absent.
fn header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> idempotency::Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| IdempotencyError::InvalidHeader {
                header: name,
                reason: "must be valid UTF-8",
            })
        })
        .transpose()
}
