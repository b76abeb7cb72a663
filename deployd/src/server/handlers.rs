//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    ActiveBuildsResponse, BuildLogsResponse, DeployResponse, ErrorResponse, HealthResponse,
    VersionResponse,
};
use tracing::warn;

use crate::build::Bundle;
use crate::deploy::orchestrator::DeployRequest;
use crate::errors::{BroadcastError, PipelineError};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error response with status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                message: message.into(),
            },
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Validation(_) => Self::new(StatusCode::BAD_REQUEST, "validation", message),
            PipelineError::ConcurrentBuildConflict { .. }
            | PipelineError::Broadcast(BroadcastError::Busy(_)) => {
                Self::new(StatusCode::CONFLICT, "conflict", message)
            }
            PipelineError::Registry(_) => Self::new(StatusCode::BAD_GATEWAY, "registry", message),
            PipelineError::ShuttingDown => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
            }
            PipelineError::Broadcast(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Accept a multipart deploy request with a `name` and a zipped `file`
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut name = String::new();
    let mut bundle = Bundle::new(Vec::new());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), "validation", format!("Multipart error: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "name" => {
                name = field.text().await.map_err(|e| {
                    ApiError::new(e.status(), "validation", format!("Name read error: {e}"))
                })?;
            }
            "file" => {
                bundle.file_name = field.file_name().map(str::to_string);
                bundle.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        ApiError::new(e.status(), "validation", format!("File read error: {e}"))
                    })?
                    .to_vec();
            }
            other => warn!("Ignoring unexpected deploy field {}", other),
        }
    }

    let ticket = state
        .orchestrator
        .submit(DeployRequest { name, bundle })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployResponse {
            logs_url: format!("/app/{}/build_logs", ticket.key),
            status_url: format!("/app/{}/build", ticket.key),
            application_id: ticket.application.id,
            key: ticket.key,
        }),
    ))
}

/// Status of the in-flight or most recent build of an application
pub async fn build_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .orchestrator
        .status(&slug)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no build known for '{}'", slug)))
}

/// Lines buffered so far for an in-flight build
pub async fn build_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (lines, outcome) = state
        .hub()
        .snapshot(&slug)
        .map_err(|e| ApiError::not_found(e.to_string()))?;

    Ok(Json(BuildLogsResponse {
        room: slug,
        lines: lines.into_iter().map(|line| line.text).collect(),
        finished: outcome.is_some(),
    }))
}

/// Builds currently in flight
pub async fn builds_handler(State(state): State<Arc<ServerState>>) -> Result<impl IntoResponse, ApiError> {
    let builds = state
        .orchestrator
        .active_builds()
        .into_iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))?;

    let total = builds.len();
    Ok(Json(ActiveBuildsResponse { builds, total }))
}
