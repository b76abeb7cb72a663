//! deployd API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Accepted deploy request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    /// Build key, also the application slug
    pub key: String,
    pub application_id: String,
    pub logs_url: String,
    pub status_url: String,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine readable kind, e.g. `validation` or `conflict`
    pub error: String,
    pub message: String,
}

/// Buffered build log lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogsResponse {
    pub room: String,
    pub lines: Vec<String>,
    pub finished: bool,
}

/// Active builds listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveBuildsResponse {
    pub builds: Vec<serde_json::Value>,
    pub total: usize,
}

/// Event kinds pushed over the build log socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketEvent {
    Build,
    Error,
    Done,
}

/// Message pushed over the build log socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketMessage {
    pub event: SocketEvent,
    pub lines: Vec<String>,
    pub room: String,
    /// Terminal outcome, only set on `done`. A `done` with a `null` outcome
    /// means the room was unavailable or the subscriber was dropped.
    #[serde(default)]
    pub outcome: Option<serde_json::Value>,
}

impl SocketMessage {
    pub fn build(room: &str, lines: Vec<String>) -> Self {
        Self {
            event: SocketEvent::Build,
            lines,
            room: room.to_string(),
            outcome: None,
        }
    }

    pub fn error(room: &str, text: impl Into<String>) -> Self {
        Self {
            event: SocketEvent::Error,
            lines: vec![text.into()],
            room: room.to_string(),
            outcome: None,
        }
    }

    pub fn done(room: &str, outcome: Option<serde_json::Value>) -> Self {
        Self {
            event: SocketEvent::Done,
            lines: Vec::new(),
            room: room.to_string(),
            outcome,
        }
    }
}
