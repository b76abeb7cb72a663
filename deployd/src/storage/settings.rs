//! Settings file management

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

use crate::filesys::file::File;
use crate::errors::AppError;
use crate::logs::LogLevel;

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/deployd/settings.json";

/// Daemon settings
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Base directory for daemon state
    #[serde(default)]
    pub data_dir: Option<String>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Application registry configuration
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Docker configuration
    #[serde(default)]
    pub docker: DockerSettings,

    /// Build pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Shutdown configuration
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
}

impl Settings {
    /// Load settings from `file`; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, AppError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted upload, in megabytes
    #[serde(default = "default_max_bundle_mb")]
    pub max_bundle_mb: u64,

    /// Allow cross-origin requests from any origin
    #[serde(default)]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_bundle_mb() -> u64 {
    256
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_bundle_mb: default_max_bundle_mb(),
            cors_permissive: false,
        }
    }
}

/// Application registry settings
#[derive(Debug, Deserialize)]
pub struct RegistrySettings {
    /// Base URL of the registry API; the embedded registry is used when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent with every registry request
    #[serde(default)]
    pub api_token: Option<SecretString>,

    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

fn default_registry_timeout() -> u64 {
    30
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: default_registry_timeout(),
        }
    }
}

/// Docker settings
#[derive(Debug, Clone, Deserialize)]
pub struct DockerSettings {
    #[serde(default = "default_docker_binary")]
    pub binary: String,

    /// Overlay network services are attached to
    #[serde(default)]
    pub network: Option<String>,

    /// Labels added to every created service
    #[serde(default)]
    pub service_labels: BTreeMap<String, String>,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            network: None,
            service_labels: BTreeMap::new(),
        }
    }
}

/// Build pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Largest inflated bundle, in megabytes
    #[serde(default = "default_max_extracted_mb")]
    pub max_extracted_mb: u64,

    /// Finished builds kept for status queries
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Events a log subscriber may fall behind before being dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_max_extracted_mb() -> u64 {
    512
}

fn default_history_capacity() -> usize {
    100
}

fn default_subscriber_buffer() -> usize {
    1024
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_extracted_mb: default_max_extracted_mb(),
            history_capacity: default_history_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Shutdown settings
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSettings {
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    /// How long in-flight builds may keep running after a shutdown signal
    #[serde(default = "default_build_drain_timeout")]
    pub build_drain_timeout_secs: u64,
}

fn default_max_shutdown_delay() -> u64 {
    60
}

fn default_build_drain_timeout() -> u64 {
    30
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_shutdown_delay_secs: default_max_shutdown_delay(),
            build_drain_timeout_secs: default_build_drain_timeout(),
        }
    }
}
