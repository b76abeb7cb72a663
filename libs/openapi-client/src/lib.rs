//! Registry API models

pub mod models;
