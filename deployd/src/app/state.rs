//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::options::RegistryOptions;
use crate::broadcast::LogHub;
use crate::deploy::docker::{DockerEngine, DockerOptions};
use crate::deploy::engine::BuildEngine;
use crate::deploy::orchestrator::{Orchestrator, PipelineOptions};
use crate::errors::AppError;
use crate::http::client::HttpClient;
use crate::registry::memory::MemoryRegistry;
use crate::registry::Registry;
use crate::storage::layout::StorageLayout;

/// Main application state
pub struct AppState {
    /// Build log rooms
    pub hub: Arc<LogHub>,

    /// Deployment pipeline
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(
        layout: &StorageLayout,
        registry: RegistryOptions,
        docker: DockerOptions,
        pipeline: PipelineOptions,
        subscriber_buffer: usize,
    ) -> Result<Self, AppError> {
        info!("Initializing application state...");

        layout.setup().await?;

        let hub = Arc::new(LogHub::new(subscriber_buffer));
        let engine: Arc<dyn BuildEngine> = Arc::new(DockerEngine::new(docker));
        let registry = init_registry(registry)?;
        let orchestrator = Arc::new(Orchestrator::new(hub.clone(), engine, registry, pipeline));

        Ok(Self { hub, orchestrator })
    }

    /// Shutdown application state, giving in-flight builds `drain` to finish
    pub async fn shutdown(&self, drain: Duration) -> Result<(), AppError> {
        info!("Shutting down application state...");
        self.orchestrator.shutdown(drain).await;
        Ok(())
    }
}

fn init_registry(options: RegistryOptions) -> Result<Arc<dyn Registry>, AppError> {
    match options.base_url {
        Some(base_url) => {
            info!("Using application registry at {}", base_url);
            let client = HttpClient::new(&base_url, options.api_token, options.timeout)
                .map_err(|e| AppError::ConfigError(e.to_string()))?;
            Ok(Arc::new(client))
        }
        None => {
            warn!("No registry configured, application records are kept in memory");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}
