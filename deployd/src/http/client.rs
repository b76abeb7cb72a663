//! HTTP client implementation

use std::time::Duration;

use openapi_client::models::RegistryErrorBody;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::RegistryError;

/// HTTP client for registry communication
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        api_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let parsed =
            Url::parse(base_url).map_err(|e| RegistryError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                base_url,
                parsed.scheme()
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RegistryError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check_status("GET", path, response).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RegistryError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url).json(body))
            .send()
            .await?;
        let response = check_status("POST", path, response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(method: &str, path: &str, response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("HTTP {} {} failed: {} - {}", method, path, status, body);

    // the registry reports details as {error, detail}, fall back to the raw body
    let detail = serde_json::from_str::<RegistryErrorBody>(&body)
        .ok()
        .map(|b| b.detail.unwrap_or(b.error))
        .unwrap_or_else(|| body.clone());

    Err(match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound(detail),
        StatusCode::CONFLICT => RegistryError::Conflict(detail),
        _ => RegistryError::Status {
            status: status.as_u16(),
            body: detail,
        },
    })
}
