//! Reactant wire protocol
//!
//! Every unit on the wire is a fixed-width frame: 256 AES-256-CBC encrypted
//! bytes, optionally followed by a 32-byte HMAC-SHA256 tag.
//!
//! ```text
//! Publish:      [A: src=0, payload=channel] [B: src=0, payload=message]
//! Subscribe:    [src=node_id,          payload=channel]
//! Unsubscribe:  [src=node_id | 0x8000, payload=channel]
//! Relay:        Core forwards A and B verbatim to every subscriber
//! ```

pub mod cipher;
pub mod codec;
pub mod constants;
pub mod message;
pub mod reader;

pub use cipher::{FrameCipher, SharedKey};
pub use codec::{CodecConfig, FrameCodec};
pub use constants::*;
pub use message::{validate_node_id, validate_payload, Direction, Message, SourceId};
pub use reader::FrameReader;
