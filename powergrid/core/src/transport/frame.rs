//! Frame Codec
//!
//! Wire format: `[length: u32 BE][crc32: u32 BE][JSON payload]`. The
//! length covers the payload only; the checksum is CRC32 over the payload.
//! A maximum frame size guards against memory exhaustion from corrupted
//! or hostile length fields.

use serde::{de::DeserializeOwned, Serialize};

use super::TransportError;

/// Maximum accepted payload size (1 MB - status frames are small).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const HEADER_SIZE: usize = 8;
const MIN_BUFFER_CAPACITY: usize = 1024;

/// Encode a message into a checksummed frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(msg).map_err(|e| TransportError::Frame(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Frame(format!(
            "frame too large: {} bytes (max {})",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Incremental decoder: buffer incoming bytes, yield complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl FrameDecoder {
    /// Empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > MIN_BUFFER_CAPACITY && self.read_pos > self.buffer.len() / 2 {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame.
    ///
    /// `Ok(None)` means more bytes are needed. Checksum or size failures
    /// are unrecoverable for the stream; callers should drop the
    /// connection.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let available = self.buffer.len() - self.read_pos;
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = u32::from_be_bytes(header[..4].try_into().expect("4-byte slice")) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::Frame(format!(
                "frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
            )));
        }
        if available < HEADER_SIZE + len {
            return Ok(None);
        }
        let expected = u32::from_be_bytes(header[4..8].try_into().expect("4-byte slice"));

        let start = self.read_pos + HEADER_SIZE;
        let payload = &self.buffer[start..start + len];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(TransportError::ChecksumMismatch { expected, actual });
        }

        let msg =
            serde_json::from_slice(payload).map_err(|e| TransportError::Frame(e.to_string()))?;
        self.read_pos = start + len;
        Ok(Some(msg))
    }
}
