//! Application registry API client

use async_trait::async_trait;
use openapi_client::models::{
    ApplicationRecord, CreateApplicationRequest, CreateServiceRequest, ServiceRecord,
};

use crate::errors::RegistryError;
use crate::http::client::HttpClient;
use crate::models::application::{Application, Service};
use crate::registry::Registry;

impl HttpClient {
    /// Create an application record
    pub async fn create_application_record(
        &self,
        request: &CreateApplicationRequest,
    ) -> Result<ApplicationRecord, RegistryError> {
        self.post("/apps", request).await
    }

    /// Get an application record by slug
    pub async fn get_application_record(&self, slug: &str) -> Result<ApplicationRecord, RegistryError> {
        let path = format!("/apps/{}", slug);
        self.get(&path).await
    }

    /// Create a service record
    pub async fn create_service_record(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceRecord, RegistryError> {
        self.post("/services", request).await
    }
}

#[async_trait]
impl Registry for HttpClient {
    async fn create_application(&self, name: &str, slug: &str) -> Result<Application, RegistryError> {
        let request = CreateApplicationRequest {
            name: name.to_string(),
            slug: slug.to_string(),
        };
        Ok(self.create_application_record(&request).await?.into())
    }

    async fn get_application(&self, slug: &str) -> Result<Application, RegistryError> {
        Ok(self.get_application_record(slug).await?.into())
    }

    async fn create_service(
        &self,
        service_id: &str,
        application_id: &str,
    ) -> Result<Service, RegistryError> {
        let request = CreateServiceRequest {
            id: service_id.to_string(),
            app_id: application_id.to_string(),
        };
        Ok(self.create_service_record(&request).await?.into())
    }
}
