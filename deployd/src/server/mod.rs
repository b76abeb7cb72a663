//! HTTP and WebSocket interface

pub mod handlers;
pub mod serve;
pub mod socket;
pub mod state;
