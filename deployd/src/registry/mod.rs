//! Application and service registry

pub mod memory;

use async_trait::async_trait;

use crate::errors::RegistryError;
use crate::models::application::{Application, Service};

/// Persistent record of applications and the services running them
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create the application record for a deploy request
    async fn create_application(&self, name: &str, slug: &str) -> Result<Application, RegistryError>;

    /// Look up an application by slug
    async fn get_application(&self, slug: &str) -> Result<Application, RegistryError>;

    /// Record a service created from one of the application's images
    async fn create_service(
        &self,
        service_id: &str,
        application_id: &str,
    ) -> Result<Service, RegistryError>;
}
