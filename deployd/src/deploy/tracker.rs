//! Observable state of one deployment

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;
use tracing::warn;

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::models::application::Application;
use crate::models::build::{BuildSnapshot, BuildStatus, DeployOutcome};

/// Pairs the deployment FSM with a watchable snapshot
pub struct BuildTracker {
    key: String,
    fsm: Mutex<DeploymentFsm>,
    snapshot: watch::Sender<BuildSnapshot>,
}

impl BuildTracker {
    pub fn new(application: Application) -> Self {
        let snapshot = BuildSnapshot::new(application);
        let (tx, _rx) = watch::channel(snapshot.clone());
        Self {
            key: snapshot.key,
            fsm: Mutex::new(DeploymentFsm::new()),
            snapshot: tx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn fsm(&self) -> MutexGuard<'_, DeploymentFsm> {
        self.fsm.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Feed an event to the FSM and publish the new state.
    /// Invalid transitions are logged and leave the state unchanged.
    pub fn apply(&self, event: DeploymentEvent) -> Option<DeploymentState> {
        let mut fsm = self.fsm();
        match fsm.process(event) {
            Ok(state) => {
                let error = fsm.error().map(str::to_string);
                self.snapshot.send_modify(|s| {
                    s.state = state;
                    s.error = error;
                    if state == DeploymentState::Released {
                        s.finished_at = Some(Utc::now());
                    }
                });
                Some(state)
            }
            Err(e) => {
                warn!("Deployment {}: {}", self.key, e);
                None
            }
        }
    }

    pub fn state(&self) -> DeploymentState {
        self.fsm().state()
    }

    pub fn set_build_status(&self, status: BuildStatus) {
        self.snapshot.send_modify(|s| s.build_status = status);
    }

    pub fn set_image(&self, image: &str) {
        self.snapshot.send_modify(|s| s.image_tag = Some(image.to_string()));
    }

    pub fn set_service(&self, service_id: &str) {
        self.snapshot
            .send_modify(|s| s.service_id = Some(service_id.to_string()));
    }

    pub fn set_outcome(&self, outcome: DeployOutcome) {
        self.snapshot.send_modify(|s| s.outcome = Some(outcome));
    }

    /// Current snapshot
    pub fn snapshot(&self) -> BuildSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<BuildSnapshot> {
        self.snapshot.subscribe()
    }
}
