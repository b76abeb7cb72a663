//! Registry API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Create application request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    pub slug: String,
}

/// Application record as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Create service request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    /// Service id assigned by the orchestration engine
    pub id: String,
    pub app_id: String,
}

/// Service record as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    #[serde(deserialize_with = "opaque_id")]
    pub app_id: String,
}

/// Registry error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryErrorBody {
    pub error: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Registries hand out either integer or string identifiers; both are kept
/// as opaque strings.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or integer id, got {}",
            other
        ))),
    }
}
