//! Domain models

pub mod application;
pub mod build;
