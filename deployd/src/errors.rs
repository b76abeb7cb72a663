//! Error types for deployd

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Errors returned synchronously to a caller submitting a deploy
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("A build for '{key}' is already in progress")]
    ConcurrentBuildConflict { key: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

/// Bundle extraction failures
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("entry '{0}' escapes the build context")]
    PathTraversal(String),

    #[error("unsupported entry '{0}'")]
    UnsupportedEntry(String),

    #[error("archive expands beyond {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("extraction cancelled")]
    Cancelled,

    #[error("IO error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ExtractionError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ExtractionError::Io(e),
            other => ExtractionError::Corrupt(other.to_string()),
        }
    }
}

/// Build session failures
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("workspace error: {0}")]
    Workspace(#[from] AppError),

    #[error("build engine unavailable: {0}")]
    Engine(#[from] EngineError),

    #[error("build failed: {detail}")]
    Failed { detail: String },

    #[error("build output ended without a result")]
    Interrupted,
}

impl BuildError {
    /// The detail text broadcast to observers
    pub fn detail(&self) -> String {
        match self {
            BuildError::Failed { detail } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors raised by the container engine client
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("engine returned an unexpected response: {0}")]
    UnexpectedOutput(String),
}

/// Errors raised by the application/service registry client
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry rejected request ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("'{0}' already exists in the registry")]
    Conflict(String),

    #[error("'{0}' not found in the registry")]
    NotFound(String),

    #[error("invalid registry URL: {0}")]
    InvalidUrl(String),
}

/// Log broadcast channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("build logs for '{0}' are unavailable")]
    Unavailable(String),

    #[error("build logs for '{0}' are still being written")]
    Busy(String),

    #[error("build '{0}' has not finished; refusing to release its logs")]
    NotFinished(String),

    #[error("build '{0}' has already finished")]
    AlreadyFinished(String),
}
