//! Logical frame contents
//!
//! A frame decrypts to the following fixed layout:
//!
//! ```text
//!  0       2               6                                         256
//!  +-------+---------------+-------------------------------------------+
//!  | len   | source id     | payload (NUL padded, last byte always 0)  |
//!  | u16BE | u32BE         | 250 bytes                                 |
//!  +-------+---------------+-------------------------------------------+
//! ```
//!
//! A source id of zero marks a publish frame. Any other value is a
//! subscription frame carrying the Node id, with bit 15 set for unsubscribe.

use std::fmt::Write as _;

use bytes::{Buf, BufMut};

use super::constants::*;
use crate::error::{Error, Result};

/// Direction carried by a subscription frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Subscribe,
    Unsubscribe,
}

/// The 32-bit source id field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u32);

impl SourceId {
    /// Source id of both frames of a publish sequence
    pub const PUBLISH: SourceId = SourceId(PUBLISH_SOURCE_ID);

    /// Wrap a raw source id as read off the wire
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Build the source id of a subscription frame
    ///
    /// Fails if `node_id` is zero or uses the reserved unsubscribe bit.
    pub fn subscription(node_id: u32, direction: Direction) -> Result<Self> {
        validate_node_id(node_id)?;

        let raw = match direction {
            Direction::Subscribe => node_id,
            Direction::Unsubscribe => node_id | UNSUBSCRIBE_FLAG,
        };
        Ok(Self(raw))
    }

    /// Raw 32-bit value
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the publish source id
    pub fn is_publish(self) -> bool {
        self.0 == PUBLISH_SOURCE_ID
    }

    /// Direction flag of a subscription frame
    pub fn direction(self) -> Direction {
        if self.0 & UNSUBSCRIBE_FLAG != 0 {
            Direction::Unsubscribe
        } else {
            Direction::Subscribe
        }
    }

    /// Node id with the direction flag masked off
    pub fn node_id(self) -> u32 {
        self.0 & !UNSUBSCRIBE_FLAG
    }
}

/// Check that a Node id can be carried by a subscription frame
pub fn validate_node_id(node_id: u32) -> Result<()> {
    if node_id == 0 {
        return Err(Error::InvalidArgument("node id 0 is reserved for publish frames".into()));
    }
    if node_id & UNSUBSCRIBE_FLAG != 0 {
        return Err(Error::InvalidArgument(format!(
            "node id {:#x} uses reserved bit 15",
            node_id
        )));
    }
    Ok(())
}

/// A decoded (plaintext) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    bytes_remaining: u16,
    source_id: SourceId,
    payload: String,
}

impl Message {
    /// Create a message, validating the payload
    ///
    /// The payload must be shorter than [`PAYLOAD_LEN`] bytes and must not
    /// contain NUL bytes (it is NUL-terminated on the wire).
    pub fn new(source_id: SourceId, payload: impl Into<String>) -> Result<Self> {
        let payload = payload.into();
        validate_payload(&payload)?;

        Ok(Self {
            bytes_remaining: payload.len() as u16,
            source_id,
            payload,
        })
    }

    /// Length field as carried in the header
    pub fn bytes_remaining(&self) -> u16 {
        self.bytes_remaining
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }

    /// Serialize into the plaintext frame layout
    pub fn to_plain(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        let mut buf = &mut frame[..];

        buf.put_u16(self.bytes_remaining);
        buf.put_u32(self.source_id.raw());
        buf.put_slice(self.payload.as_bytes());
        // Remaining bytes are already zero

        frame
    }

    /// Parse the plaintext frame layout
    ///
    /// Never fails: the payload is read up to the first NUL (or the last
    /// payload byte, which is treated as zero regardless of its value).
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn from_plain(frame: &[u8; FRAME_LEN]) -> Self {
        let mut buf = &frame[..];
        let bytes_remaining = buf.get_u16();
        let source_id = SourceId::from_raw(buf.get_u32());

        let payload = &buf[..MAX_PAYLOAD_LEN];
        let end = payload.iter().position(|&b| b == 0).unwrap_or(MAX_PAYLOAD_LEN);
        let payload = String::from_utf8_lossy(&payload[..end]).into_owned();

        Self {
            bytes_remaining,
            source_id,
            payload,
        }
    }

    /// Render the plaintext frame as rows of 16 hex bytes, for trace logs
    pub fn hex_dump(&self) -> String {
        hex_dump(&self.to_plain())
    }
}

/// Check a payload string against the fixed-width limits
pub fn validate_payload(payload: &str) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::InvalidArgument(format!(
            "payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    if payload.as_bytes().contains(&0) {
        return Err(Error::InvalidArgument("payload contains a NUL byte".into()));
    }
    Ok(())
}

/// Format bytes as rows of 16 space-separated hex pairs
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, row) in bytes.chunks(16).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:04x}:", i * 16);
        for byte in row {
            let _ = write!(out, " {:02x}", byte);
        }
    }
    out
}
