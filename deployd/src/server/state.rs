//! Server state

use std::sync::Arc;

use crate::broadcast::LogHub;
use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn hub(&self) -> &Arc<LogHub> {
        self.orchestrator.hub()
    }
}
