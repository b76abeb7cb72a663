//! Container engine interface

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::EngineError;

/// One event of an image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Progress output
    Log(String),

    /// Error output; the build may still be running
    Error(String),

    /// Terminal: the image was produced
    Succeeded { image: String },

    /// Terminal: the build failed
    Failed { detail: String },
}

/// Output of a running build. Dropping the stream aborts the build.
pub type EngineStream = BoxStream<'static, EngineEvent>;

/// Builds images and launches services from them
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Start building `context` into an image tagged `tag`
    async fn build_image(&self, context: &Path, tag: &str) -> Result<EngineStream, EngineError>;

    /// Launch a service named `name` running `image`; returns the service id
    async fn create_service(&self, image: &str, name: &str) -> Result<String, EngineError>;
}
