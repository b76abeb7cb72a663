//! Build models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentState;
use crate::models::application::Application;

/// Kind of a buffered log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Ordinary build output
    Build,

    /// Error reported by the engine or the pipeline
    Error,
}

/// One line of build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Position in the build's log, starting at 0
    pub seq: u64,
    pub kind: LogKind,
    pub text: String,
}

impl LogLine {
    pub fn is_error(&self) -> bool {
        self.kind == LogKind::Error
    }
}

/// Status of the build session itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Extracting,
    Building,
    Succeeded,
    Failed,
}

/// Terminal signal of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// Image built, service running and recorded
    Succeeded { service_id: String },

    /// The uploaded bundle could not be unpacked
    ExtractionFailed { detail: String },

    /// The engine reported a build failure
    BuildFailed { detail: String },

    /// The image exists but no service runs it
    ServiceCreationFailed { image: String, detail: String },

    /// The service runs but the registry does not know about it
    PersistenceFailed { service_id: String, detail: String },

    /// The build was aborted before reaching a result
    Cancelled { detail: String },
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeployOutcome::Succeeded { .. })
    }

    /// Short machine-readable kind, matches the serialized `status` tag
    pub fn kind(&self) -> &'static str {
        match self {
            DeployOutcome::Succeeded { .. } => "succeeded",
            DeployOutcome::ExtractionFailed { .. } => "extraction_failed",
            DeployOutcome::BuildFailed { .. } => "build_failed",
            DeployOutcome::ServiceCreationFailed { .. } => "service_creation_failed",
            DeployOutcome::PersistenceFailed { .. } => "persistence_failed",
            DeployOutcome::Cancelled { .. } => "cancelled",
        }
    }

    /// Human readable one-liner for the log stream
    pub fn summary(&self) -> String {
        match self {
            DeployOutcome::Succeeded { service_id } => {
                format!("Deployed as service {}", service_id)
            }
            DeployOutcome::ExtractionFailed { detail } => {
                format!("Could not unpack the uploaded bundle: {}", detail)
            }
            DeployOutcome::BuildFailed { detail } => format!("Build failed: {}", detail),
            DeployOutcome::ServiceCreationFailed { image, detail } => {
                format!("Image {} was built but the service could not be created: {}", image, detail)
            }
            DeployOutcome::PersistenceFailed { service_id, detail } => format!(
                "Service {} is running but could not be recorded, manual reconciliation required: {}",
                service_id, detail
            ),
            DeployOutcome::Cancelled { detail } => format!("Build cancelled: {}", detail),
        }
    }
}

/// Point-in-time view of one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSnapshot {
    pub key: String,
    pub application: Application,
    pub state: DeploymentState,
    pub build_status: BuildStatus,
    pub image_tag: Option<String>,
    pub service_id: Option<String>,
    pub outcome: Option<DeployOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BuildSnapshot {
    pub fn new(application: Application) -> Self {
        Self {
            key: application.slug.clone(),
            application,
            state: DeploymentState::Accepted,
            build_status: BuildStatus::Pending,
            image_tag: None,
            service_id: None,
            outcome: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Whether the build's logs have been released
    pub fn is_released(&self) -> bool {
        self.state == DeploymentState::Released
    }
}
