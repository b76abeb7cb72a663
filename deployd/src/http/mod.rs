//! HTTP client for the application registry

pub mod apps;
pub mod client;
