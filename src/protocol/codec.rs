//! Frame codec
//!
//! Converts between [`Message`]s and the bytes that go on the wire: plaintext
//! layout, AES-256-CBC encryption and (optionally) a trailing HMAC tag.

use bytes::{BufMut, Bytes, BytesMut};

use super::cipher::{FrameCipher, SharedKey};
use super::constants::{FRAME_LEN, TAG_LEN};
use super::message::{Message, SourceId};
use crate::error::{Error, Result};

/// Codec configuration shared by the Core and every Node
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Pre-shared key and IV
    pub shared_key: SharedKey,

    /// Append and verify an HMAC-SHA256 tag on every frame
    pub integrity: bool,
}

impl CodecConfig {
    /// Baseline configuration: 256-byte frames, no integrity tag
    pub fn new(shared_key: SharedKey) -> Self {
        Self {
            shared_key,
            integrity: false,
        }
    }

    /// Enable or disable the integrity tag
    pub fn integrity(mut self, enabled: bool) -> Self {
        self.integrity = enabled;
        self
    }
}

/// Encodes and decodes fixed-width encrypted frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    cipher: FrameCipher,
    integrity: bool,
}

impl FrameCodec {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            cipher: FrameCipher::new(config.shared_key.clone()),
            integrity: config.integrity,
        }
    }

    /// Number of bytes each frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        if self.integrity {
            FRAME_LEN + TAG_LEN
        } else {
            FRAME_LEN
        }
    }

    /// Whether frames carry an integrity tag
    pub fn integrity(&self) -> bool {
        self.integrity
    }

    /// Encode a payload under the given source id
    ///
    /// Fails with `InvalidArgument` if the payload does not fit a frame.
    pub fn encode(&self, source_id: SourceId, payload: &str) -> Result<Bytes> {
        let message = Message::new(source_id, payload)?;
        self.encode_message(&message)
    }

    /// Encode an already validated message
    pub fn encode_message(&self, message: &Message) -> Result<Bytes> {
        let mut frame = message.to_plain();
        self.cipher.encrypt(&mut frame)?;

        let mut wire = BytesMut::with_capacity(self.wire_len());
        wire.put_slice(&frame);
        if self.integrity {
            wire.put_slice(&self.cipher.tag(&frame)?);
        }

        tracing::trace!(
            source_id = message.source_id().raw(),
            len = message.bytes_remaining(),
            "Encoded frame"
        );

        Ok(wire.freeze())
    }

    /// Decode one wire frame
    ///
    /// The input must be exactly [`wire_len`](Self::wire_len) bytes. Without an
    /// integrity tag any input of that size decodes; a wrong key simply yields
    /// garbage ids and payloads. With a tag, mismatches fail `Unauthenticated`.
    pub fn decode(&self, wire: &[u8]) -> Result<Message> {
        if wire.len() != self.wire_len() {
            return Err(Error::InvalidArgument(format!(
                "frame of {} bytes, expected {}",
                wire.len(),
                self.wire_len()
            )));
        }

        let (ciphertext, tag) = wire.split_at(FRAME_LEN);
        if self.integrity {
            self.cipher.verify(ciphertext, tag)?;
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(ciphertext);
        self.cipher.decrypt(&mut frame)?;

        let message = Message::from_plain(&frame);
        tracing::trace!(frame = %message.hex_dump(), "Decoded frame");

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{IV_LEN, KEY_LEN, MAX_PAYLOAD_LEN, PAYLOAD_LEN};
    use crate::protocol::message::Direction;

    fn config() -> CodecConfig {
        CodecConfig::new(SharedKey::new([0x11; KEY_LEN], [0x22; IV_LEN]))
    }

    #[test]
    fn test_roundtrip() {
        let codec = FrameCodec::new(&config());
        let source = SourceId::subscription(0x741, Direction::Subscribe).unwrap();

        let wire = codec.encode(source, "chat1").unwrap();
        let message = codec.decode(&wire).unwrap();

        assert_eq!(message.source_id(), source);
        assert_eq!(message.payload(), "chat1");
        assert_eq!(message.bytes_remaining(), 5);
    }

    #[test]
    fn test_frame_width_is_fixed() {
        let codec = FrameCodec::new(&config());

        let longest = "x".repeat(MAX_PAYLOAD_LEN);
        for payload in ["", "72", longest.as_str()] {
            let wire = codec.encode(SourceId::PUBLISH, payload).unwrap();
            assert_eq!(wire.len(), FRAME_LEN);
        }
    }

    #[test]
    fn test_ciphertext_hides_payload() {
        let codec = FrameCodec::new(&config());
        let wire = codec.encode(SourceId::PUBLISH, "temperature").unwrap();

        assert!(!wire.windows(11).any(|w| w == b"temperature"));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let codec = FrameCodec::new(&config());
        let result = codec.encode(SourceId::PUBLISH, &"x".repeat(PAYLOAD_LEN));

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let codec = FrameCodec::new(&config());

        assert!(matches!(
            codec.decode(&[0u8; FRAME_LEN - 1]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_integrity_tag() {
        let codec = FrameCodec::new(&config().integrity(true));
        assert_eq!(codec.wire_len(), FRAME_LEN + TAG_LEN);

        let wire = codec.encode(SourceId::PUBLISH, "72").unwrap();
        assert_eq!(wire.len(), FRAME_LEN + TAG_LEN);
        assert_eq!(codec.decode(&wire).unwrap().payload(), "72");

        let mut tampered = wire.to_vec();
        tampered[10] ^= 0x01;
        assert!(matches!(codec.decode(&tampered), Err(Error::Unauthenticated)));
    }

    #[test]
    fn test_mismatched_keys_do_not_authenticate() {
        let sender = FrameCodec::new(&config().integrity(true));
        let receiver = FrameCodec::new(
            &CodecConfig::new(SharedKey::new([0x33; KEY_LEN], [0x22; IV_LEN])).integrity(true),
        );

        let wire = sender.encode(SourceId::PUBLISH, "72").unwrap();
        assert!(matches!(receiver.decode(&wire), Err(Error::Unauthenticated)));
    }
}
