//! Build sessions

pub mod archive;
pub mod session;

pub use session::{BuildSession, Bundle, SessionOptions};
