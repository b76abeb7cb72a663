//! A single image build

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::broadcast::LogHub;
use crate::build::archive;
use crate::deploy::engine::{BuildEngine, EngineEvent};
use crate::errors::BuildError;
use crate::filesys::dir::{Dir, ScopedDir};
use crate::models::build::BuildStatus;

/// Uploaded source bundle
#[derive(Debug, Clone)]
pub struct Bundle {
    /// File name as uploaded, informational only
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl Bundle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            file_name: None,
            bytes,
        }
    }
}

/// Build session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory under which per-build working directories are created
    pub workspace: Dir,

    /// Upper bound for the inflated size of a bundle
    pub max_extracted_bytes: u64,
}

/// Drives one image build and streams its output into the key's log room
pub struct BuildSession {
    key: String,
    hub: Arc<LogHub>,
    engine: Arc<dyn BuildEngine>,
    options: SessionOptions,
}

impl BuildSession {
    pub fn new(
        key: impl Into<String>,
        hub: Arc<LogHub>,
        engine: Arc<dyn BuildEngine>,
        options: SessionOptions,
    ) -> Self {
        Self {
            key: key.into(),
            hub,
            engine,
            options,
        }
    }

    /// Extract `bundle` and build it into an image tagged with the session
    /// key. `on_status` observes every status change.
    ///
    /// The working directory is removed before returning, and also when the
    /// returned future is dropped midway.
    pub async fn run<F>(&self, bundle: Bundle, mut on_status: F) -> Result<String, BuildError>
    where
        F: FnMut(BuildStatus) + Send,
    {
        on_status(BuildStatus::Extracting);
        let result = match self.options.workspace.create_scoped(&self.key).await {
            Ok(workdir) => {
                let result = self.run_in(&workdir, bundle, &mut on_status).await;
                if let Err(e) = workdir.remove().await {
                    warn!("Failed to clean up after build {}: {}", self.key, e);
                }
                result
            }
            Err(e) => Err(BuildError::Workspace(e)),
        };

        match &result {
            Ok(image) => {
                info!("Build {} produced image {}", self.key, image);
                on_status(BuildStatus::Succeeded);
            }
            Err(e) => {
                info!("Build {} failed: {}", self.key, e);
                on_status(BuildStatus::Failed);
            }
        }
        result
    }

    async fn run_in<F>(
        &self,
        workdir: &ScopedDir,
        bundle: Bundle,
        on_status: &mut F,
    ) -> Result<String, BuildError>
    where
        F: FnMut(BuildStatus) + Send,
    {
        let stats = archive::extract(bundle.bytes, workdir, self.options.max_extracted_bytes).await?;
        debug!("Build {} context has {} files", self.key, stats.files);

        on_status(BuildStatus::Building);
        let context = workdir.subdir(archive::CONTEXT_DIR);
        let mut events = self.engine.build_image(context.path(), &self.key).await?;
        let mut last_error = None;

        while let Some(event) = events.next().await {
            match event {
                EngineEvent::Log(line) => self.publish(line, false),
                EngineEvent::Error(text) => {
                    last_error = Some(text.clone());
                    self.publish(text, true);
                }
                EngineEvent::Succeeded { image } => return Ok(image),
                EngineEvent::Failed { detail } => return Err(BuildError::Failed { detail }),
            }
        }

        Err(match last_error {
            Some(detail) => BuildError::Failed { detail },
            None => BuildError::Interrupted,
        })
    }

    fn publish(&self, line: String, is_error: bool) {
        let result = if is_error {
            self.hub.append_error(&self.key, line)
        } else {
            self.hub.append(&self.key, line)
        };
        if let Err(e) = result {
            warn!("Dropping build output for {}: {}", self.key, e);
        }
    }
}
