//! # agentmux protocol
//!
//! Shared contracts between the agentmux daemon and its display clients:
//!
//! - [`messages`]: stream protocol messages (subscribe, input, frame, patch)
//! - [`control`]: synchronous JSON control surface (polling fallback)
//! - [`screen`]: window identities, statuses, and styled screen lines
//! - [`framing`]: length-prefixed frame codec with LZ4 compression
//! - [`error`]: error types
//!
//! The stream path is MessagePack inside [`framing`] frames over a local
//! socket; the control path is newline-delimited JSON on a second socket.

pub mod control;
pub mod error;
pub mod framing;
pub mod messages;
pub mod screen;

pub use control::{ControlRequest, ControlResponse};
pub use error::{ProtocolError, Result};
pub use framing::{
    read_frame, try_decode, write_frame, COMPRESS_THRESHOLD, FRAME_HEADER_LEN, FRAME_MAGIC,
    MAX_FRAME_LEN,
};
pub use messages::{
    ClientMessage, ErrorCode, FrameUpdate, PatchOp, PatchUpdate, ServerMessage, PROTOCOL_VERSION,
};
pub use screen::{
    Attrs, Color, CursorPos, Line, Style, StyleRun, WindowEntry, WindowId, WindowStatus,
};
