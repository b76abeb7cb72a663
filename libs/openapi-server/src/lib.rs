//! deployd API models

pub mod models;
