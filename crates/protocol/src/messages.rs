//! Stream protocol messages.
//!
//! All stream-socket traffic is MessagePack-encoded and carried in frames
//! (see [`crate::framing`]). Clients open with `Hello`; the server pushes
//! `Frame`/`Patch`/`WindowExit` events per subscribed window.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::screen::{CursorPos, Line, WindowId};

/// Current stream protocol version. `Hello` must carry this exact value.
pub const PROTOCOL_VERSION: u16 = 1;

/// Messages sent from a display client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Protocol handshake; must be the first message on a connection.
    Hello {
        /// Version the client speaks.
        version: u16,
    },
    /// Subscribe to a window at the given geometry. The server resizes the
    /// window and replies with a full frame. Re-subscribing is idempotent
    /// and always yields a fresh frame.
    Subscribe {
        window: WindowId,
        cols: u16,
        rows: u16,
    },
    /// Mark a window as the client's active target. Advisory only; input
    /// to any window remains allowed.
    Focus { window: WindowId },
    /// Raw keystrokes for a window, written verbatim to the process.
    Input {
        window: WindowId,
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
    },
    /// Resize a window's PTY and screen.
    Resize {
        window: WindowId,
        cols: u16,
        rows: u16,
    },
}

/// Messages pushed from the daemon to a display client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Complete screen snapshot at a sequence number.
    Frame(FrameUpdate),
    /// Changed rows relative to the previous sequence number.
    Patch(PatchUpdate),
    /// The window's process terminated. Always the last message for a
    /// window, sent exactly once per subscription.
    WindowExit {
        window: WindowId,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Request-scoped error; the connection stays open unless framing
    /// itself was corrupted.
    Error { code: ErrorCode, message: String },
}

/// A full viewport snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameUpdate {
    pub window: WindowId,
    /// Per-window sequence number; strictly increasing.
    pub seq: u64,
    /// Exactly `rows` lines of the viewport, top to bottom.
    pub lines: Vec<Line>,
    pub cursor: CursorPos,
}

/// Changed viewport rows relative to the previous sequence.
///
/// A client may apply a patch only when `seq` is exactly one past its
/// last-seen sequence and `line_count` matches its held frame; otherwise it
/// must wait for a fresh frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchUpdate {
    pub window: WindowId,
    pub seq: u64,
    /// Total viewport rows at this sequence, for geometry cross-checking.
    pub line_count: u16,
    /// Replacements ordered by ascending row index.
    pub ops: Vec<PatchOp>,
}

/// One row replacement within a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    /// Viewport row index, 0-based.
    pub index: u16,
    /// New contents of the row.
    pub line: Line,
}

/// Error classes reported to stream clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Hello carried an unsupported protocol version.
    VersionMismatch,
    /// The referenced window does not exist.
    UnknownWindow,
    /// The message could not be interpreted.
    Malformed,
    /// The daemon is shutting down.
    ShuttingDown,
    /// The operation failed inside the runtime.
    Internal,
}

impl ClientMessage {
    /// Encode to MessagePack for framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a frame payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl ServerMessage {
    /// Encode to MessagePack for framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a frame payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Line;

    fn wid() -> WindowId {
        WindowId::new("proj", "main")
    }

    #[test]
    fn hello_roundtrip() {
        let msg = ClientMessage::Hello {
            version: PROTOCOL_VERSION,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ClientMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn subscribe_roundtrip() {
        let msg = ClientMessage::Subscribe {
            window: wid(),
            cols: 120,
            rows: 40,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ClientMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn input_preserves_raw_bytes() {
        let msg = ClientMessage::Input {
            window: wid(),
            bytes: vec![0x1b, b'[', b'A', 0x00, 0xff],
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ClientMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn frame_roundtrip() {
        let msg = ServerMessage::Frame(FrameUpdate {
            window: wid(),
            seq: 7,
            lines: vec![Line::plain("$ ls"), Line::blank(4)],
            cursor: CursorPos {
                row: 1,
                col: 0,
                visible: true,
            },
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ServerMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn patch_roundtrip() {
        let msg = ServerMessage::Patch(PatchUpdate {
            window: wid(),
            seq: 8,
            line_count: 24,
            ops: vec![PatchOp {
                index: 3,
                line: Line::plain("hello"),
            }],
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ServerMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn window_exit_roundtrip() {
        let msg = ServerMessage::WindowExit {
            window: wid(),
            code: Some(0),
            signal: None,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ServerMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn error_roundtrip() {
        let msg = ServerMessage::Error {
            code: ErrorCode::UnknownWindow,
            message: "no such window proj:main".to_string(),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ServerMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(ClientMessage::from_bytes(&[0xc1, 0x00, 0x01]).is_err());
        assert!(ServerMessage::from_bytes(&[]).is_err());
    }
}
