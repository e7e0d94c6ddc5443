//! Frame encryption
//!
//! Whole 256-byte frames are encrypted in place with AES-256-CBC using a key and
//! IV shared out of band by the Core and every Node. The frame width is a whole
//! number of AES blocks, so no padding is applied.
//!
//! An optional HMAC-SHA256 tag, keyed with the same shared key, authenticates the
//! ciphertext (encrypt-then-MAC).

use std::fmt;

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::constants::{FRAME_LEN, IV_LEN, KEY_LEN, TAG_LEN};
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Pre-shared AES-256 key and CBC initialization vector
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SharedKey {
    /// Create from raw key and IV bytes
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Parse a hex-encoded key (64 hex digits) and IV (32 hex digits)
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        hex::decode_to_slice(key_hex.trim(), &mut key)
            .map_err(|e| Error::InvalidArgument(format!("key: {}", e)))?;

        let mut iv = [0u8; IV_LEN];
        hex::decode_to_slice(iv_hex.trim(), &mut iv)
            .map_err(|e| Error::InvalidArgument(format!("iv: {}", e)))?;

        Ok(Self { key, iv })
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKey")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Encrypts, decrypts and authenticates fixed-width frames
#[derive(Clone, Debug)]
pub struct FrameCipher {
    shared: SharedKey,
}

impl FrameCipher {
    pub fn new(shared: SharedKey) -> Self {
        Self { shared }
    }

    /// Encrypt a plaintext frame in place
    pub fn encrypt(&self, frame: &mut [u8; FRAME_LEN]) -> Result<()> {
        Aes256CbcEnc::new(&self.shared.key.into(), &self.shared.iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut frame[..], FRAME_LEN)
            .map_err(|_| Error::Cipher("frame is not block aligned"))?;
        Ok(())
    }

    /// Decrypt a ciphertext frame in place
    pub fn decrypt(&self, frame: &mut [u8; FRAME_LEN]) -> Result<()> {
        Aes256CbcDec::new(&self.shared.key.into(), &self.shared.iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut frame[..])
            .map_err(|_| Error::Cipher("frame is not block aligned"))?;
        Ok(())
    }

    /// Compute the integrity tag over `data`
    pub fn tag(&self, data: &[u8]) -> Result<[u8; TAG_LEN]> {
        let mut mac = self.mac()?;
        mac.update(data);

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    /// Verify an integrity tag in constant time
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> Result<()> {
        let mut mac = self.mac()?;
        mac.update(data);
        mac.verify_slice(tag).map_err(|_| Error::Unauthenticated)
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.shared.key).map_err(|_| Error::Cipher("invalid HMAC key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FrameCipher {
        FrameCipher::new(SharedKey::new([0x42; KEY_LEN], [0x24; IV_LEN]))
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = cipher();
        let mut frame = [0u8; FRAME_LEN];
        frame[..5].copy_from_slice(b"hello");
        let original = frame;

        cipher.encrypt(&mut frame).unwrap();
        assert_ne!(frame, original);

        cipher.decrypt(&mut frame).unwrap();
        assert_eq!(frame, original);
    }

    #[test]
    fn test_fixed_iv_is_deterministic() {
        let cipher = cipher();
        let mut a = [7u8; FRAME_LEN];
        let mut b = [7u8; FRAME_LEN];

        cipher.encrypt(&mut a).unwrap();
        cipher.encrypt(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_key_garbles() {
        let mut frame = [1u8; FRAME_LEN];
        cipher().encrypt(&mut frame).unwrap();

        let other = FrameCipher::new(SharedKey::new([0x43; KEY_LEN], [0x24; IV_LEN]));
        other.decrypt(&mut frame).unwrap();
        assert_ne!(frame, [1u8; FRAME_LEN]);
    }

    #[test]
    fn test_tag_verify() {
        let cipher = cipher();
        let tag = cipher.tag(b"ciphertext").unwrap();

        assert!(cipher.verify(b"ciphertext", &tag).is_ok());
        assert!(matches!(
            cipher.verify(b"ciphertexT", &tag),
            Err(Error::Unauthenticated)
        ));

        let mut bad = tag;
        bad[0] ^= 0xFF;
        assert!(matches!(
            cipher.verify(b"ciphertext", &bad),
            Err(Error::Unauthenticated)
        ));
    }

    #[test]
    fn test_shared_key_from_hex() {
        let key_hex = "00".repeat(KEY_LEN);
        let iv_hex = "ff".repeat(IV_LEN);
        let shared = SharedKey::from_hex(&key_hex, &iv_hex).unwrap();

        assert_eq!(shared.key(), &[0u8; KEY_LEN]);
        assert_eq!(shared.iv(), &[0xFFu8; IV_LEN]);

        assert!(SharedKey::from_hex("abcd", &iv_hex).is_err());
        assert!(SharedKey::from_hex(&key_hex, "zz").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let shared = SharedKey::new([0x42; KEY_LEN], [0x24; IV_LEN]);
        let debug = format!("{:?}", shared);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("42"));
    }
}
