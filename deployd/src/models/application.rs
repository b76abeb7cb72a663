//! Application and service records

use openapi_client::models::{ApplicationRecord, ServiceRecord};
use serde::{Deserialize, Serialize};

/// An application created for one deploy request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Registry-assigned identifier
    pub id: String,

    /// Name as submitted
    pub name: String,

    /// Derived build key
    pub slug: String,
}

impl From<ApplicationRecord> for Application {
    fn from(record: ApplicationRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            slug: record.slug,
        }
    }
}

/// A running service linked to the application it was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Engine-assigned service identifier
    pub id: String,

    pub application_id: String,
}

impl From<ServiceRecord> for Service {
    fn from(record: ServiceRecord) -> Self {
        Self {
            id: record.id,
            application_id: record.app_id,
        }
    }
}
