//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::docker::DockerOptions;
use crate::deploy::orchestrator::PipelineOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Registry configuration
    pub registry: RegistryOptions,

    /// Docker engine options
    pub docker: DockerOptions,

    /// Build pipeline options
    pub pipeline: PipelineOptions,

    /// Queue length of a log subscriber
    pub subscriber_buffer: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(Settings::default())
    }
}

impl AppOptions {
    /// Translate the settings file into typed options
    pub fn from_settings(settings: Settings) -> Self {
        let storage = settings
            .data_dir
            .map(StorageLayout::new)
            .unwrap_or_default();

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.lifecycle.max_shutdown_delay_secs),
                build_drain_timeout: Duration::from_secs(
                    settings.lifecycle.build_drain_timeout_secs,
                ),
            },
            server: ServerOptions {
                host: settings.server.host,
                port: settings.server.port,
                max_bundle_bytes: mb_to_bytes(settings.server.max_bundle_mb) as usize,
                cors_permissive: settings.server.cors_permissive,
            },
            registry: RegistryOptions {
                base_url: settings.registry.base_url.filter(|url| !url.trim().is_empty()),
                api_token: settings.registry.api_token,
                timeout: Duration::from_secs(settings.registry.timeout_secs),
            },
            docker: DockerOptions {
                binary: settings.docker.binary,
                network: settings.docker.network,
                service_labels: settings.docker.service_labels.into_iter().collect(),
            },
            pipeline: PipelineOptions {
                workspace: storage.workspace_dir(),
                max_extracted_bytes: mb_to_bytes(settings.pipeline.max_extracted_mb),
                history_capacity: settings.pipeline.history_capacity,
            },
            subscriber_buffer: settings.pipeline.subscriber_buffer,
            storage,
        }
    }
}

fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Time in-flight builds get to finish before they are aborted
    pub build_drain_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(60),
            build_drain_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on, 0 for an ephemeral port
    pub port: u16,

    /// Largest accepted request body
    pub max_bundle_bytes: usize,

    /// Allow cross-origin requests from any origin
    pub cors_permissive: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_bundle_bytes: 256 * 1024 * 1024,
            cors_permissive: false,
        }
    }
}

/// Registry options
#[derive(Debug, Default)]
pub struct RegistryOptions {
    /// Registry API base URL; `None` selects the embedded registry
    pub base_url: Option<String>,

    pub api_token: Option<SecretString>,

    pub timeout: Duration,
}
