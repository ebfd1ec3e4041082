//! Payload encoding helpers and the Bluetooth Classic frame buffer.
//!
//! Classic peripherals speak length-prefixed frames: a little-endian `u16`
//! byte count followed by that many payload bytes. Frames are forwarded to
//! the control client whole, header included, base64 encoded. In the other
//! direction the client supplies pre-framed bytes, so sends are written to
//! the socket verbatim after decoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Buf, BytesMut};

use btlink_types::ENCODING_BASE64;

use crate::error::{Error, Result};

/// Decode a request payload, insisting on the base64 encoding.
pub fn decode_payload(message: &str, encoding: &str) -> Result<Vec<u8>> {
    if encoding != ENCODING_BASE64 {
        return Err(Error::UnsupportedEncoding(encoding.to_owned()));
    }
    Ok(BASE64.decode(message)?)
}

/// Encode device bytes for the wire.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Reassembles length-prefixed frames from a Classic socket byte stream.
///
/// Reads can split or merge frames arbitrarily; the buffer yields one
/// complete frame at a time, header included.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read socket bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < 2 {
            return None;
        }
        let payload_len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        let frame_len = 2 + payload_len;
        if self.buf.len() < frame_len {
            return None;
        }
        let frame = self.buf[..frame_len].to_vec();
        self.buf.advance(frame_len);
        Some(frame)
    }
}
