//! deployd library
//!
//! Accepts zipped application bundles, builds them into container images,
//! streams the build output to any number of live observers, and launches
//! the result as a swarm service.

pub mod app;
pub mod broadcast;
pub mod build;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod slug;
pub mod storage;
pub mod utils;
