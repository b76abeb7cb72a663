//! In-memory caches

pub mod builds;
