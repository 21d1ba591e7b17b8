//! Control surface messages.
//!
//! The control socket is the synchronous request/response fallback: JSON,
//! newline-delimited, one response per request. It operates on the same
//! window identities as the stream protocol so a consumer can function on
//! polling alone when the streaming channel is down.

use serde::{Deserialize, Serialize};

use crate::screen::{WindowEntry, WindowId};

/// Requests accepted on the control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Liveness check.
    Ping,
    /// Daemon status summary.
    Status,
    /// List live and recently-closed windows.
    ListWindows,
    /// Mark the daemon-wide active window. Advisory; never restricts input.
    Focus { window: WindowId },
    /// Send text input to a window. `submit` appends a carriage return.
    SendInput {
        window: WindowId,
        text: String,
        submit: bool,
    },
    /// Read raw output bytes at or after `offset` from the window's ring
    /// buffer. Polling consumers pass the returned `next_offset` back in.
    BufferSince { window: WindowId, offset: u64 },
    /// Start a window running `command` (argv form) in `cwd` with extra
    /// environment variables.
    StartWindow {
        session: String,
        window: String,
        command: Vec<String>,
        env: Vec<(String, String)>,
        cwd: Option<String>,
    },
    /// Stop a window: graceful signal, then force-kill after the grace
    /// period. Idempotent.
    StopWindow { window: WindowId },
    /// Resize a window's PTY and screen.
    ResizeWindow {
        window: WindowId,
        cols: u16,
        rows: u16,
    },
    /// Ask the daemon to shut down.
    Shutdown,
}

/// Responses sent on the control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Reply to `Ping`.
    Pong,
    /// Reply to `Status`.
    Status {
        uptime_secs: u64,
        window_count: usize,
        stream_clients: usize,
    },
    /// Reply to `ListWindows`.
    Windows { windows: Vec<WindowEntry> },
    /// Reply to `Focus`.
    Focused { window: WindowId },
    /// Reply to `SendInput`.
    InputSent,
    /// Reply to `BufferSince`. `data` may start later than the requested
    /// offset when older bytes have been evicted.
    Buffer {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Absolute offset of the first byte in `data`.
        start_offset: u64,
        /// Offset to pass on the next poll.
        next_offset: u64,
    },
    /// Reply to `StartWindow`.
    WindowStarted { window: WindowId },
    /// Reply to `StopWindow`.
    WindowStopped { window: WindowId },
    /// Reply to `ResizeWindow`.
    WindowResized { window: WindowId },
    /// Reply to `Shutdown`.
    ShuttingDown,
    /// The request failed; the connection stays usable.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serializes_as_bare_variant() {
        let json = serde_json::to_string(&ControlRequest::Ping).unwrap();
        assert_eq!(json, r#""Ping""#);
        let back: ControlRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ControlRequest::Ping);
    }

    #[test]
    fn send_input_roundtrip() {
        let req = ControlRequest::SendInput {
            window: WindowId::new("proj", "main"),
            text: "ls -la".to_string(),
            submit: true,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ControlRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn buffer_since_roundtrip() {
        let req = ControlRequest::BufferSince {
            window: WindowId::new("proj", "main"),
            offset: 4096,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ControlRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn start_window_roundtrip() {
        let req = ControlRequest::StartWindow {
            session: "proj".to_string(),
            window: "agent-1".to_string(),
            command: vec!["claude".to_string(), "--resume".to_string()],
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            cwd: Some("/work/proj".to_string()),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ControlRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn buffer_response_roundtrip() {
        let resp = ControlResponse::Buffer {
            data: b"hello\r\n".to_vec(),
            start_offset: 0,
            next_offset: 7,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: ControlResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn error_response_roundtrip() {
        let resp = ControlResponse::Error {
            message: "no such window".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("no such window"));
        let back: ControlResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }
}
