//! Wire protocol constants

/// Width of one encrypted frame on the wire (without integrity tag)
pub const FRAME_LEN: usize = 256;

/// Bytes 0-1 (length) + bytes 2-5 (source id)
pub const HEADER_LEN: usize = 6;

/// Fixed payload buffer size; the last byte is always zero
pub const PAYLOAD_LEN: usize = FRAME_LEN - HEADER_LEN;

/// Longest payload string accepted by the encoder (exclusive of the NUL)
pub const MAX_PAYLOAD_LEN: usize = PAYLOAD_LEN - 1;

/// HMAC-SHA256 tag appended to each frame when integrity checking is enabled
pub const TAG_LEN: usize = 32;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length
pub const IV_LEN: usize = 16;

/// Bit of the source id marking a subscription frame as an unsubscribe
pub const UNSUBSCRIBE_FLAG: u32 = 0x8000;

/// Source id reserved for publish frames
pub const PUBLISH_SOURCE_ID: u32 = 0;

/// Default Core port
pub const DEFAULT_PORT: u16 = 10112;

/// Pending-connection backlog of the Core's listening socket
pub const LISTEN_BACKLOG: u32 = 16;
