//! Deployment module

pub mod docker;
pub mod engine;
pub mod fsm;
pub mod orchestrator;
pub mod tracker;
