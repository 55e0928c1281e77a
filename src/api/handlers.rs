//! HTTP request handlers for the exposed model

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::core::app_state::AppState;
use crate::core::error::Error;
use crate::core::types::Revision;
use crate::delta::ApplyReport;
use crate::notify::WaitOutcome;
use crate::system::metrics::collect_metrics;

/// Error wrapper that renders a crate [`Error`] as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status code the error maps to
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::UnknownKey { .. } => StatusCode::NOT_FOUND,
            err if err.is_conflict() => StatusCode::CONFLICT,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "key": self.0.key(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Query of the long-poll endpoint
#[derive(Debug, Deserialize)]
pub struct UpdateQuery {
    /// Revision the client already holds
    #[serde(default)]
    pub revision: Revision,
    /// Requested wait in milliseconds, clamped to the configured maximum
    pub timeout_ms: Option<u64>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// Seconds since the server started
    pub uptime_secs: u64,
    /// Crate version
    pub version: String,
    /// Latest committed revision
    pub revision: Revision,
}

/// Server information response
#[derive(Serialize)]
pub struct InfoResponse {
    /// Crate name
    pub name: String,
    /// Crate version
    pub version: String,
    /// Model synchronisation endpoints
    pub endpoints: Vec<String>,
    /// Number of elements in the model, hidden ones included
    pub elements: usize,
    /// Apply policy for unknown keys
    pub unknown_keys: String,
}

fn json_document(bytes: Bytes) -> Response {
    ([(CONTENT_TYPE, "application/json")], Body::from(bytes)).into_response()
}

/// `GET /getExposedModelUpdate?revision=R[&timeout_ms=T]`
///
/// Holds the request until an exposed element changes after `R`, then answers
/// with the delta since `R`. Commits that only touch hidden elements advance
/// the revision without waking the client. Answers `204 No Content` when the
/// wait times out. A client that disconnects drops this future, which ends the
/// wait.
pub async fn get_exposed_model_update(
    State(state): State<AppState>,
    Query(query): Query<UpdateQuery>,
) -> ApiResult<Response> {
    let timeout = state
        .config
        .long_poll_timeout(query.timeout_ms.map(Duration::from_millis));
    let started = Instant::now();
    let mut after = query.revision;

    loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        match state.model.wait_for_revision_async(after, remaining).await {
            WaitOutcome::Advanced(revision) => {
                let doc = state.model.lock()?.delta_document(query.revision);
                if doc.is_noop() {
                    debug!(since = query.revision, revision, "only hidden elements changed");
                    after = doc.revision;
                    continue;
                }
                debug!(since = query.revision, revision = doc.revision, "sending delta document");
                return Ok(json_document(doc.to_bytes()?));
            }
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                return Ok(StatusCode::NO_CONTENT.into_response());
            }
        }
    }
}

/// `GET /getExposedModel`
pub async fn get_exposed_model(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(json_document(state.model.full_document()?))
}

/// `POST /updateState`
pub async fn update_state(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ApplyReport>> {
    Ok(Json(state.model.apply_document(&body)?))
}

/// `GET /api/v1/health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        version: crate::VERSION.to_string(),
        revision: state.model.current_revision(),
    })
}

/// `GET /api/v1/info`
pub async fn system_info(State(state): State<AppState>) -> ApiResult<Json<InfoResponse>> {
    let elements = state.model.keys()?.len();
    Ok(Json(InfoResponse {
        name: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        endpoints: vec![
            "GET /getExposedModel".to_string(),
            "GET /getExposedModelUpdate".to_string(),
            "POST /updateState".to_string(),
        ],
        elements,
        unknown_keys: format!("{:?}", state.model.unknown_key_policy()).to_lowercase(),
    }))
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> ApiResult<Response> {
    if !state.config.metrics.enable_prometheus {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let text = collect_metrics()?;
    Ok(([(CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}
