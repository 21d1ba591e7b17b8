//! Length-prefixed framing for the stream socket.
//!
//! Each frame on the wire is:
//! - 4 bytes: magic `AMUX`
//! - 4 bytes: payload length including the flags byte (big-endian)
//! - 1 byte: flags (bit 0 = LZ4 compressed)
//! - N bytes: payload
//!
//! Payloads above [`COMPRESS_THRESHOLD`] are LZ4 compressed when that
//! actually shrinks them; the flags byte records which form was sent.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"AMUX";

/// Maximum total frame size. Screen updates are small; 4 MB leaves ample
/// headroom for a full frame of a very tall window.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Payloads longer than this are candidates for compression.
pub const COMPRESS_THRESHOLD: usize = 2048;

/// Header size: magic + length + flags.
pub const FRAME_HEADER_LEN: usize = 9;

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Encode a payload into a complete wire frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN - FRAME_HEADER_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len() + FRAME_HEADER_LEN,
            max: MAX_FRAME_LEN,
        });
    }

    let mut flags = 0u8;
    let body: Vec<u8>;
    let body_ref: &[u8] = if payload.len() > COMPRESS_THRESHOLD {
        let compressed = lz4_flex::compress_prepend_size(payload);
        if compressed.len() < payload.len() {
            flags |= FLAG_COMPRESSED;
            body = compressed;
            &body
        } else {
            payload
        }
    } else {
        payload
    };

    let content_len = 1 + body_ref.len();
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN - 1 + content_len);
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&(content_len as u32).to_be_bytes());
    out.push(flags);
    out.extend_from_slice(body_ref);
    Ok(out)
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more data is needed, or the decoded payload and
/// the number of bytes consumed.
pub fn try_decode(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    if buf[0..4] != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic {
            got: [buf[0], buf[1], buf[2], buf[3]],
        });
    }

    let content_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if content_len < 1 || 8 + content_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: 8 + content_len,
            max: MAX_FRAME_LEN,
        });
    }

    if buf.len() < 8 + content_len {
        return Ok(None);
    }

    let flags = buf[8];
    let body = &buf[9..8 + content_len];
    let payload = if flags & FLAG_COMPRESSED != 0 {
        lz4_flex::decompress_size_prepended(body)
            .map_err(|e| ProtocolError::Decode(format!("lz4 decompress: {e}")))?
    } else {
        body.to_vec()
    };

    Ok(Some((payload, 8 + content_len)))
}

/// Write one frame to an async stream and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let frame = encode(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from an async stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF in the middle
/// of a frame is a [`ProtocolError::ConnectionClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_LEN];

    // First header byte distinguishes clean EOF from a truncated frame.
    match reader.read(&mut header[..1]).await? {
        0 => return Ok(None),
        _ => {}
    }
    reader.read_exact(&mut header[1..]).await?;

    if header[0..4] != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic {
            got: [header[0], header[1], header[2], header[3]],
        });
    }

    let content_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if content_len < 1 || 8 + content_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: 8 + content_len,
            max: MAX_FRAME_LEN,
        });
    }

    let flags = header[8];
    let mut body = vec![0u8; content_len - 1];
    reader.read_exact(&mut body).await?;

    if flags & FLAG_COMPRESSED != 0 {
        let payload = lz4_flex::decompress_size_prepended(&body)
            .map_err(|e| ProtocolError::Decode(format!("lz4 decompress: {e}")))?;
        Ok(Some(payload))
    } else {
        Ok(Some(body))
    }
}
