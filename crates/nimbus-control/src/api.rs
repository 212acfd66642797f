//! HTTP surface of the control plane service.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET` | `/health` | liveness |
//! | `GET` | `/ready` | readiness |
//! | `POST` | `/v1/answers` | asynchronous answers from agents |
//! | `GET` | `/v1/resources/:kind/:id` | current state of a resource |

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nimbus_core::{CoreError, Record, ResourceId, ResourceKind};
use nimbus_dispatch::{AgentTransport, Answer, AnswerOutcome};
use nimbus_store::VersionedStore;
use serde::Serialize;
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::ControlError;
use crate::kinds::{SharedFs, TemplateCopy, Volume};
use crate::service::ControlPlane;

/// Largest accepted request body; answers are small JSON documents.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across handlers.
pub struct AppState<S, T> {
    /// The control plane.
    pub control: Arc<ControlPlane<S, T>>,
}

impl<S, T> Clone for AppState<S, T> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
        }
    }
}

/// A [`ControlError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self.0.http_status_code() {
            400 => "bad_request",
            404 => "not_found",
            409 => "conflict",
            502 => "dispatch_failed",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct AnswerResponse {
    outcome: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "nimbus-control",
    })
}

async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

async fn answer_handler<S, T>(
    State(state): State<AppState<S, T>>,
    Json(answer): Json<Answer>,
) -> impl IntoResponse
where
    S: VersionedStore<Volume> + VersionedStore<SharedFs> + VersionedStore<TemplateCopy> + 'static,
    T: AgentTransport + 'static,
{
    let outcome = match state.control.deliver_answer(answer) {
        AnswerOutcome::Applied => "applied",
        AnswerOutcome::Progress => "progress",
        AnswerOutcome::Discarded => "discarded",
    };
    Json(AnswerResponse { outcome })
}

async fn resource_handler<S, T>(
    State(state): State<AppState<S, T>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError>
where
    S: VersionedStore<Volume> + VersionedStore<SharedFs> + VersionedStore<TemplateCopy> + 'static,
    T: AgentTransport + 'static,
{
    let id: ResourceId = id
        .parse()
        .map_err(|e| ControlError::from(CoreError::InvalidId(e)))?;
    let control = &state.control;

    let value = match kind.as_str() {
        k if k == Volume::NAME => to_json(&control.volumes().get(id)?),
        k if k == SharedFs::NAME => to_json(&control.filesystems().get(id)?),
        k if k == TemplateCopy::NAME => to_json(&control.templates().get(id)?),
        _ => Err(ControlError::UnknownKind(kind)),
    }?;
    Ok(Json(value))
}

fn to_json<K: ResourceKind>(record: &Record<K>) -> Result<Value, ControlError> {
    serde_json::to_value(record).map_err(|e| ControlError::Internal(e.to_string()))
}

/// Build the service router.
pub fn create_router<S, T>(state: AppState<S, T>) -> Router
where
    S: VersionedStore<Volume> + VersionedStore<SharedFs> + VersionedStore<TemplateCopy> + 'static,
    T: AgentTransport + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/v1/answers", post(answer_handler::<S, T>))
        .route("/v1/resources/:kind/:id", get(resource_handler::<S, T>))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
