//! Finite State Machine for a single deployment

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Request validated, application record created
    Accepted,

    /// Bundle unpacked into the build context
    Extracted,

    /// Image built
    Built,

    /// Swarm service created from the image
    ServiceCreated,

    /// Service record written to the registry
    Persisted,

    /// Log buffer released; nothing left to do
    Released,

    /// A step failed or the build was cancelled
    Failed,
}

/// Which step a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    Build,
    ServiceCreation,
    Persistence,
    Cancelled,
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Bundle extracted, build starting
    Extracted,

    /// Image build succeeded
    Built,

    /// Service creation succeeded
    ServiceCreated,

    /// Service record written
    Persisted,

    /// A step failed
    Fail(FailureKind, String),

    /// Terminal signal broadcast and log buffer released
    Release,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    failure: Option<FailureKind>,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in accepted state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Accepted,
            failure: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Step the deployment failed in, if it failed
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentState, String> {
        use DeploymentState as S;
        use FailureKind as K;

        let new_state = match (self.state, &event) {
            (S::Accepted, DeploymentEvent::Extracted) => S::Extracted,
            (S::Extracted, DeploymentEvent::Built) => S::Built,
            (S::Built, DeploymentEvent::ServiceCreated) => S::ServiceCreated,
            (S::ServiceCreated, DeploymentEvent::Persisted) => S::Persisted,

            // Failures are only valid from the step that can produce them
            (S::Accepted, DeploymentEvent::Fail(K::Extraction, _))
            | (S::Extracted, DeploymentEvent::Fail(K::Build, _))
            | (S::Built, DeploymentEvent::Fail(K::ServiceCreation, _))
            | (S::ServiceCreated, DeploymentEvent::Fail(K::Persistence, _)) => {
                self.record_failure(&event);
                S::Failed
            }
            (
                S::Accepted | S::Extracted | S::Built | S::ServiceCreated,
                DeploymentEvent::Fail(K::Cancelled, _),
            ) => {
                self.record_failure(&event);
                S::Failed
            }

            (S::Persisted | S::Failed, DeploymentEvent::Release) => S::Released,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }

    fn record_failure(&mut self, event: &DeploymentEvent) {
        if let DeploymentEvent::Fail(kind, detail) = event {
            self.failure = Some(*kind);
            self.error = Some(detail.clone());
        }
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
