//! Main application run loop

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AppError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run deployd until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    info!("Initializing deployd...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start deployd: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AppError> {
    let AppOptions {
        lifecycle: _,
        storage,
        server,
        registry,
        docker,
        pipeline,
        subscriber_buffer,
    } = options;

    let app_state = Arc::new(
        AppState::init(&storage, registry, docker, pipeline, subscriber_buffer).await?,
    );
    shutdown_manager.with_app_state(app_state.clone())?;

    info!("Initializing HTTP server...");
    let server_state = Arc::new(ServerState::new(app_state.orchestrator.clone()));
    let mut shutdown_rx = shutdown_tx.subscribe();
    let (addr, server_handle) = serve(&server, server_state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(addr, server_handle)?;

    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), AppError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), AppError> {
        if self.app_state.is_some() {
            return Err(AppError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        addr: SocketAddr,
        handle: JoinHandle<Result<(), AppError>>,
    ) -> Result<(), AppError> {
        if self.server_handle.is_some() {
            return Err(AppError::ShutdownError("server_handle already set".to_string()));
        }
        info!("HTTP server listening on {}", addr);
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AppError> {
        info!("Shutting down deployd...");

        // 1. Builds, while the server still delivers their final log events
        if let Some(app_state) = self.app_state.take() {
            app_state
                .shutdown(self.lifecycle_options.build_drain_timeout)
                .await?;
        }

        // 2. HTTP server
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| AppError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
