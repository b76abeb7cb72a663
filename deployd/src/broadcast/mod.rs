//! Build log broadcast
//!
//! Every build key owns a room: an append-only buffer of log lines plus the
//! set of subscribers currently following it. Joining hands out the buffer
//! accumulated so far and registers the subscriber under the same lock that
//! appends take, so the snapshot and the live tail never overlap or leave a
//! gap.

pub mod hub;

pub use hub::{LogHub, RoomEvent, Subscription};
