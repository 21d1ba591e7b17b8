//! Stream server: push-based screen synchronization for display clients.

mod server;
mod subscriber;

pub use server::{StreamServer, StreamSettings};
pub use subscriber::MAX_PENDING_PATCHES;
