//! # agentmux client library
//!
//! The display-side half of the runtime multiplexer, embedded in the
//! interactive front end:
//!
//! - [`StreamClient`]: reconnecting push connection (frames, patches,
//!   window exits), replaying subscriptions after every reconnect
//! - [`ScreenModel`]: client-held screen state with strict sequence
//!   gating; a gap or geometry mismatch waits for a fresh frame
//! - [`ControlClient`]: synchronous JSON request/response fallback that
//!   works when the streaming channel is down

mod control;
mod model;
mod stream;

pub use control::ControlClient;
pub use model::{Applied, ScreenModel};
pub use stream::{StreamClient, StreamEvent};

use thiserror::Error;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection or task is gone.
    #[error("connection closed")]
    Closed,

    /// A control round trip timed out.
    #[error("operation timed out")]
    Timeout,

    /// Transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] protocol::ProtocolError),

    /// Control-surface JSON failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
