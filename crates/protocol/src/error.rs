//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering framing, encoding, and connection failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to encode a message.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Failed to decode a message or frame.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {len} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared or actual frame length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Frame header did not start with the expected magic bytes.
    #[error("invalid frame magic: got {got:02x?}")]
    BadMagic {
        /// The four bytes found where the magic was expected.
        got: [u8; 4],
    },

    /// Peer speaks an incompatible protocol version.
    #[error("protocol version mismatch: peer {peer}, ours {ours}")]
    VersionMismatch {
        /// Version announced by the peer.
        peer: u16,
        /// Version this build speaks.
        ours: u16,
    },

    /// Connection was closed while a frame was expected.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Underlying I/O error.
    #[error("i/o error: {0}")]
    Io(std::io::Error),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Io(err),
        }
    }
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ProtocolError::Encode(err.to_string())
        } else {
            ProtocolError::Decode(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_too_large_display() {
        let err = ProtocolError::FrameTooLarge { len: 9000, max: 4096 };
        assert_eq!(
            err.to_string(),
            "frame too large: 9000 bytes exceeds maximum of 4096 bytes"
        );
    }

    #[test]
    fn version_mismatch_display() {
        let err = ProtocolError::VersionMismatch { peer: 2, ours: 1 };
        assert_eq!(err.to_string(), "protocol version mismatch: peer 2, ours 1");
    }

    #[test]
    fn io_eof_maps_to_connection_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: ProtocolError = io.into();
        assert!(matches!(err, ProtocolError::ConnectionClosed(_)));
    }

    #[test]
    fn io_other_stays_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ProtocolError = io.into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn rmp_decode_error_maps_to_decode() {
        let err = rmp_serde::from_slice::<String>(&[0xc1]).unwrap_err();
        let err: ProtocolError = err.into();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
