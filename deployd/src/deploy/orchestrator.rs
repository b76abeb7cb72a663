//! Deployment orchestration
//!
//! A deploy request is validated and registered synchronously; extraction,
//! image build, service creation and persistence then run as a background
//! task per build key. Every task ends by broadcasting a terminal outcome and
//! releasing the key's log room, whether it succeeds, fails, or is aborted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broadcast::LogHub;
use crate::build::{BuildSession, Bundle, SessionOptions};
use crate::cache::builds::BuildHistory;
use crate::deploy::engine::BuildEngine;
use crate::deploy::fsm::{DeploymentEvent, DeploymentState, FailureKind};
use crate::deploy::tracker::BuildTracker;
use crate::errors::{BroadcastError, BuildError, PipelineError, RegistryError};
use crate::filesys::dir::Dir;
use crate::models::application::Application;
use crate::models::build::{BuildSnapshot, BuildStatus, DeployOutcome};
use crate::registry::Registry;
use crate::slug;

/// Pipeline options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory holding per-build working directories
    pub workspace: Dir,

    /// Upper bound for the inflated size of a bundle
    pub max_extracted_bytes: u64,

    /// Number of finished builds kept for status queries
    pub history_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workspace: Dir::new(std::env::temp_dir().join("deployd")),
            max_extracted_bytes: 512 * 1024 * 1024,
            history_capacity: 100,
        }
    }
}

/// A deploy request
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Human readable application name
    pub name: String,
    pub bundle: Bundle,
}

/// Handle returned for an accepted deploy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTicket {
    /// Build key under which logs and status are published
    pub key: String,
    pub application: Application,
}

enum Slot {
    /// Key claimed while the request is still being registered
    Reserved,
    Running(ActiveBuild),
}

struct ActiveBuild {
    tracker: Arc<BuildTracker>,
    task: Option<JoinHandle<()>>,
}

/// Runs deployments and supervises their background tasks
pub struct Orchestrator {
    hub: Arc<LogHub>,
    engine: Arc<dyn BuildEngine>,
    registry: Arc<dyn Registry>,
    options: PipelineOptions,
    active: Mutex<HashMap<String, Slot>>,
    history: BuildHistory,
    accepting: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        hub: Arc<LogHub>,
        engine: Arc<dyn BuildEngine>,
        registry: Arc<dyn Registry>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            hub,
            engine,
            registry,
            history: BuildHistory::new(options.history_capacity),
            options,
            active: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn hub(&self) -> &Arc<LogHub> {
        &self.hub
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ================================ SUBMIT ======================================= //

    /// Accept a deploy request.
    ///
    /// Returns once the application is registered; the build itself runs in
    /// the background. A second request for a key whose build is still in
    /// flight is rejected.
    pub async fn submit(self: &Arc<Self>, request: DeployRequest) -> Result<DeployTicket, PipelineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::ShuttingDown);
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(PipelineError::Validation("application name is required".to_string()));
        }
        if request.bundle.bytes.is_empty() {
            return Err(PipelineError::Validation("source bundle is empty".to_string()));
        }
        let key = slug::resolve(name)?;

        self.reserve(&key)?;
        if let Err(e) = self.hub.open(&key) {
            self.unreserve(&key);
            return Err(match e {
                BroadcastError::Busy(key) => PipelineError::ConcurrentBuildConflict { key },
                other => other.into(),
            });
        }

        let application = match self.register(name, &key).await {
            Ok(application) => application,
            Err(e) => {
                error!("Failed to register application {}: {}", key, e);
                self.abandon(&key, format!("application could not be registered: {}", e));
                return Err(e.into());
            }
        };

        if !self.accepting.load(Ordering::SeqCst) {
            self.abandon(&key, "shutting down".to_string());
            return Err(PipelineError::ShuttingDown);
        }

        let tracker = Arc::new(BuildTracker::new(application.clone()));
        self.active().insert(
            key.clone(),
            Slot::Running(ActiveBuild {
                tracker: tracker.clone(),
                task: None,
            }),
        );

        // Spawned without holding the lock: a task refused by a runtime that
        // is shutting down is dropped in place, and its guard concludes it.
        let guard = AbortGuard {
            orchestrator: self.clone(),
            tracker: tracker.clone(),
            armed: true,
        };
        let task = tokio::spawn(self.clone().run_build(guard, request.bundle));
        if let Some(Slot::Running(build)) = self.active().get_mut(&key) {
            if Arc::ptr_eq(&build.tracker, &tracker) {
                build.task = Some(task);
            }
        }

        info!("Accepted deploy of {} as {}", application.name, key);
        Ok(DeployTicket { key, application })
    }

    fn reserve(&self, key: &str) -> Result<(), PipelineError> {
        let mut active = self.active();
        if active.contains_key(key) {
            return Err(PipelineError::ConcurrentBuildConflict {
                key: key.to_string(),
            });
        }
        active.insert(key.to_string(), Slot::Reserved);
        Ok(())
    }

    fn unreserve(&self, key: &str) {
        let mut active = self.active();
        if matches!(active.get(key), Some(Slot::Reserved)) {
            active.remove(key);
        }
    }

    /// Give up on a reserved key before its build started
    fn abandon(&self, key: &str, detail: String) {
        if let Err(e) = self.hub.finish(key, DeployOutcome::Cancelled { detail }) {
            warn!("Failed to finish log room {}: {}", key, e);
        }
        if let Err(e) = self.hub.release(key) {
            warn!("Failed to release log room {}: {}", key, e);
        }
        self.unreserve(key);
    }

    /// Create the application record, reusing the existing one on redeploy
    async fn register(&self, name: &str, key: &str) -> Result<Application, RegistryError> {
        match self.registry.create_application(name, key).await {
            Err(RegistryError::Conflict(_)) => {
                info!("Application {} already registered, reusing it", key);
                self.registry.get_application(key).await
            }
            other => other,
        }
    }

    // ================================ PIPELINE ===================================== //

    /// The guard travels inside the task so that it also fires when the task
    /// is aborted before its first poll
    async fn run_build(self: Arc<Self>, mut guard: AbortGuard, bundle: Bundle) {
        let tracker = guard.tracker.clone();
        let outcome = self.execute(&tracker, bundle).await;
        guard.armed = false;
        self.conclude(&tracker, outcome);
    }

    async fn execute(&self, tracker: &Arc<BuildTracker>, bundle: Bundle) -> DeployOutcome {
        let key = tracker.key().to_string();
        let application = tracker.snapshot().application;

        // Accepted -> Extracted -> Built
        let session = BuildSession::new(
            key.clone(),
            self.hub.clone(),
            self.engine.clone(),
            SessionOptions {
                workspace: self.options.workspace.clone(),
                max_extracted_bytes: self.options.max_extracted_bytes,
            },
        );
        let status_tracker = tracker.clone();
        let result = session
            .run(bundle, move |status| {
                status_tracker.set_build_status(status);
                if status == BuildStatus::Building {
                    status_tracker.apply(DeploymentEvent::Extracted);
                }
            })
            .await;

        let image = match result {
            Ok(image) => image,
            Err(e) => {
                let detail = e.detail();
                return match e {
                    BuildError::Extraction(_) | BuildError::Workspace(_) => {
                        tracker.apply(DeploymentEvent::Fail(FailureKind::Extraction, detail.clone()));
                        DeployOutcome::ExtractionFailed { detail }
                    }
                    _ => {
                        tracker.apply(DeploymentEvent::Fail(FailureKind::Build, detail.clone()));
                        DeployOutcome::BuildFailed { detail }
                    }
                };
            }
        };
        tracker.set_image(&image);
        tracker.apply(DeploymentEvent::Built);

        // Built -> ServiceCreated
        let service_id = match self.engine.create_service(&image, &key).await {
            Ok(service_id) => service_id,
            Err(e) => {
                let detail = e.to_string();
                error!("Image {} built but service creation failed: {}", image, detail);
                tracker.apply(DeploymentEvent::Fail(FailureKind::ServiceCreation, detail.clone()));
                return DeployOutcome::ServiceCreationFailed { image, detail };
            }
        };
        tracker.set_service(&service_id);
        tracker.apply(DeploymentEvent::ServiceCreated);

        // ServiceCreated -> Persisted
        match self.registry.create_service(&service_id, &application.id).await {
            Ok(service) => {
                tracker.apply(DeploymentEvent::Persisted);
                DeployOutcome::Succeeded {
                    service_id: service.id,
                }
            }
            // a redeploy updates the service recorded by the previous one
            Err(RegistryError::Conflict(_)) => {
                info!("Service {} of {} is already recorded", service_id, key);
                tracker.apply(DeploymentEvent::Persisted);
                DeployOutcome::Succeeded { service_id }
            }
            Err(e) => {
                let detail = e.to_string();
                error!(
                    "Inconsistency: service {} runs for application {} ({}) but was not recorded: {}",
                    service_id, key, application.id, detail
                );
                tracker.apply(DeploymentEvent::Fail(FailureKind::Persistence, detail.clone()));
                DeployOutcome::PersistenceFailed { service_id, detail }
            }
        }
    }

    /// Broadcast the outcome, release the log room and retire the build
    fn conclude(&self, tracker: &BuildTracker, outcome: DeployOutcome) {
        let key = tracker.key();

        if !outcome.is_success() {
            if let Err(e) = self.hub.append_error(key, outcome.summary()) {
                warn!("Failed to publish outcome of {}: {}", key, e);
            }
        }
        tracker.set_outcome(outcome.clone());

        if let Err(e) = self.hub.finish(key, outcome.clone()) {
            warn!("Failed to finish log room {}: {}", key, e);
        }
        match self.hub.release(key) {
            Ok(lines) => info!("Deployment {} finished as {} ({} log lines)", key, outcome.kind(), lines),
            Err(e) => warn!("Failed to release log room {}: {}", key, e),
        }

        // waiters woken by the release must not see the key as taken
        let mut active = self.active();
        tracker.apply(DeploymentEvent::Release);
        self.history.insert(tracker.snapshot());
        active.remove(key);
    }

    // ================================ SUPERVISION ================================== //

    /// Status of the in-flight or most recent build for `key`
    pub fn status(&self, key: &str) -> Option<BuildSnapshot> {
        {
            let active = self.active();
            if let Some(Slot::Running(build)) = active.get(key) {
                return Some(build.tracker.snapshot());
            }
        }
        self.history.get(key)
    }

    /// Wait for the build of `key` to be released. Returns immediately with
    /// the recorded status if the build already finished.
    pub async fn wait(&self, key: &str) -> Option<BuildSnapshot> {
        let rx = {
            let active = self.active();
            match active.get(key) {
                Some(Slot::Running(build)) => Some(build.tracker.subscribe()),
                _ => None,
            }
        };

        if let Some(mut rx) = rx {
            if let Ok(snapshot) = rx.wait_for(|s| s.is_released()).await {
                return Some(snapshot.clone());
            }
        }
        self.history.get(key)
    }

    /// Snapshots of every build still in flight
    pub fn active_builds(&self) -> Vec<BuildSnapshot> {
        let active = self.active();
        let mut builds: Vec<BuildSnapshot> = active
            .values()
            .filter_map(|slot| match slot {
                Slot::Running(build) => Some(build.tracker.snapshot()),
                Slot::Reserved => None,
            })
            .collect();
        builds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        builds
    }

    /// Recently finished builds, most recent first
    pub fn history(&self) -> Vec<BuildSnapshot> {
        self.history.list()
    }

    /// Stop accepting requests, wait up to `drain` for in-flight builds, then
    /// abort the rest. Aborted builds finish as cancelled.
    pub async fn shutdown(&self, drain: Duration) {
        self.accepting.store(false, Ordering::SeqCst);

        let keys: Vec<String> = self.active().keys().cloned().collect();
        if keys.is_empty() {
            return;
        }
        info!("Waiting up to {:?} for {} builds to finish", drain, keys.len());

        let drained = futures::future::join_all(keys.iter().map(|key| self.wait(key)));
        if tokio::time::timeout(drain, drained).await.is_ok() {
            return;
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut active = self.active();
            active
                .values_mut()
                .filter_map(|slot| match slot {
                    Slot::Running(build) => build.task.take(),
                    Slot::Reserved => None,
                })
                .collect()
        };
        warn!("Aborting {} builds still running", handles.len());

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Build task failed: {}", e);
                }
            }
        }
    }
}

/// Concludes a build whose task was aborted or panicked before reaching an
/// outcome
struct AbortGuard {
    orchestrator: Arc<Orchestrator>,
    tracker: Arc<BuildTracker>,
    armed: bool,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let outcome = match self.tracker.state() {
            // nothing left but the release
            DeploymentState::Persisted => match self.tracker.snapshot().service_id {
                Some(service_id) => DeployOutcome::Succeeded { service_id },
                None => DeployOutcome::Cancelled {
                    detail: "build task aborted".to_string(),
                },
            },
            DeploymentState::Failed | DeploymentState::Released => DeployOutcome::Cancelled {
                detail: "build task aborted".to_string(),
            },
            _ => {
                let detail = "build task aborted".to_string();
                self.tracker
                    .apply(DeploymentEvent::Fail(FailureKind::Cancelled, detail.clone()));
                DeployOutcome::Cancelled { detail }
            }
        };

        warn!("Build {} aborted", self.tracker.key());
        self.orchestrator.conclude(&self.tracker, outcome);
    }
}
