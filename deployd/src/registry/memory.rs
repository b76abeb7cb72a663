//! Embedded registry, used when no registry URL is configured

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::RegistryError;
use crate::models::application::{Application, Service};
use crate::registry::Registry;
use crate::utils::generate_uuid;

#[derive(Default)]
struct Records {
    applications: HashMap<String, Application>,
    services: Vec<Service>,
}

/// In-memory registry. Records live as long as the process.
#[derive(Default)]
pub struct MemoryRegistry {
    records: RwLock<Records>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded services
    pub fn services(&self) -> Vec<Service> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.services.clone()
    }

    /// All recorded applications
    pub fn applications(&self) -> Vec<Application> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.applications.values().cloned().collect()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn create_application(&self, name: &str, slug: &str) -> Result<Application, RegistryError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.applications.contains_key(slug) {
            return Err(RegistryError::Conflict(slug.to_string()));
        }

        let application = Application {
            id: generate_uuid(),
            name: name.to_string(),
            slug: slug.to_string(),
        };
        records
            .applications
            .insert(slug.to_string(), application.clone());
        debug!("Registered application {} ({})", slug, application.id);
        Ok(application)
    }

    async fn get_application(&self, slug: &str) -> Result<Application, RegistryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .applications
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(slug.to_string()))
    }

    async fn create_service(
        &self,
        service_id: &str,
        application_id: &str,
    ) -> Result<Service, RegistryError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if !records.applications.values().any(|a| a.id == application_id) {
            return Err(RegistryError::NotFound(application_id.to_string()));
        }
        if records.services.iter().any(|s| s.id == service_id) {
            return Err(RegistryError::Conflict(service_id.to_string()));
        }

        let service = Service {
            id: service_id.to_string(),
            application_id: application_id.to_string(),
        };
        records.services.push(service.clone());
        Ok(service)
    }
}
