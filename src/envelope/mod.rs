//! Envelope — sealed transport between the operator and analyzer roles
//!
//! AES-256-CBC (PKCS#7) followed by HMAC-SHA256 over `iv || ciphertext`
//! (encrypt-then-MAC). Each `seal` draws a fresh random IV; the cipher and
//! MAC keys are separate subkeys of the one session key.
//!
//! The envelope never logs. Reporting tamper events is the caller's job.

mod session_key;

pub use session_key::SessionKey;

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type CbcEncryptor = cbc::Encryptor<Aes256>;
type CbcDecryptor = cbc::Decryptor<Aes256>;

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 32;

const ENC_PURPOSE: &[u8] = b"threatloop-envelope-enc-v1";
const MAC_PURPOSE: &[u8] = b"threatloop-envelope-mac-v1";

/// Ciphertext plus its authentication tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    #[serde(with = "hex_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub tag: Vec<u8>,
}

impl SealedMessage {
    /// Parse the JSON wire form
    pub fn from_json(json: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(json).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

/// Symmetric seal/open boundary
pub struct Envelope {
    key: SessionKey,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            key: SessionKey::generate(),
        }
    }

    pub fn with_key(key: SessionKey) -> Self {
        Self { key }
    }

    /// Replace the session key. Messages sealed before cannot be opened after.
    pub fn reseed(&mut self) {
        self.key = SessionKey::generate();
    }

    pub fn key_preview(&self) -> String {
        self.key.preview()
    }

    /// Encrypt and tag a plaintext
    pub fn seal(&self, plaintext: &str) -> Result<SealedMessage, EnvelopeError> {
        let iv: [u8; IV_LEN] = rand::random();
        let pt = plaintext.as_bytes();

        let mut buf = vec![0u8; pt.len() + IV_LEN];
        buf[..pt.len()].copy_from_slice(pt);

        let ciphertext = CbcEncryptor::new_from_slices(&self.key.derive(ENC_PURPOSE), &iv)
            .map_err(|_| EnvelopeError::Malformed("cipher key/iv length".into()))?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, pt.len())
            .map_err(|_| EnvelopeError::Malformed("padding buffer too small".into()))?
            .to_vec();

        let tag = self.mac(&iv, &ciphertext)?.finalize().into_bytes().to_vec();

        Ok(SealedMessage {
            iv: iv.to_vec(),
            ciphertext,
            tag,
        })
    }

    /// Verify and decrypt. Undecodable text is replaced, not rejected.
    pub fn open(&self, msg: &SealedMessage) -> Result<String, EnvelopeError> {
        let bytes = self.open_bytes(msg)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Like [`Envelope::open`] but fails with `Decode` on invalid UTF-8
    pub fn open_strict(&self, msg: &SealedMessage) -> Result<String, EnvelopeError> {
        let bytes = self.open_bytes(msg)?;
        String::from_utf8(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }

    /// Verify the tag, then decrypt to raw bytes
    pub fn open_bytes(&self, msg: &SealedMessage) -> Result<Vec<u8>, EnvelopeError> {
        if msg.iv.len() != IV_LEN {
            // The IV is covered by the tag, so a mangled IV is tampering too
            return Err(EnvelopeError::Tamper);
        }

        self.mac(&msg.iv, &msg.ciphertext)?
            .verify_slice(&msg.tag)
            .map_err(|_| EnvelopeError::Tamper)?;

        let mut buf = msg.ciphertext.clone();
        let plaintext = CbcDecryptor::new_from_slices(&self.key.derive(ENC_PURPOSE), &msg.iv)
            .map_err(|_| EnvelopeError::Malformed("cipher key/iv length".into()))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| EnvelopeError::Decode("invalid padding".into()))?;

        Ok(plaintext.to_vec())
    }

    /// One raw block encrypted without padding and tagged correctly. The tag
    /// verifies but a final byte outside 1..=16 fails the padding check.
    #[cfg(test)]
    pub(crate) fn seal_unpadded_block(&self, block: [u8; IV_LEN]) -> SealedMessage {
        use cbc::cipher::block_padding::NoPadding;

        let iv: [u8; IV_LEN] = rand::random();
        let mut buf = block;
        let ciphertext = CbcEncryptor::new_from_slices(&self.key.derive(ENC_PURPOSE), &iv)
            .unwrap()
            .encrypt_padded_mut::<NoPadding>(&mut buf, IV_LEN)
            .unwrap()
            .to_vec();
        let tag = self.mac(&iv, &ciphertext).unwrap().finalize().into_bytes().to_vec();
        SealedMessage {
            iv: iv.to_vec(),
            ciphertext,
            tag,
        }
    }

    fn mac(&self, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, EnvelopeError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key.derive(MAC_PURPOSE))
            .map_err(|_| EnvelopeError::Malformed("mac key length".into()))?;
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac)
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope errors
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Tampering detected: authentication tag mismatch")]
    Tamper,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Malformed sealed message: {0}")]
    Malformed(String),
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_round_trip() {
        let env = Envelope::new();
        for m in ["", "a", "' OR 1=1--", "exactly sixteen!", "émoji ✓ payload", "x".repeat(1000).as_str()] {
            let sealed = env.seal(m).unwrap();
            assert_eq!(env.open(&sealed).unwrap(), m);
        }
    }

    #[test]
    fn test_round_trip_random() {
        let env = Envelope::new();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let len = rng.gen_range(0..200);
            let m: String = (0..len).map(|_| rng.gen::<char>()).collect();
            let sealed = env.seal(&m).unwrap();
            assert_eq!(env.open_strict(&sealed).unwrap(), m);
        }
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let env = Envelope::new();
        let a = env.seal("same").unwrap();
        let b = env.seal("same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_bit_flip_is_tamper() {
        let env = Envelope::new();
        let sealed = env.seal("drop table users; --").unwrap();
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let mut msg = sealed.clone();
            let field = match rng.gen_range(0..3) {
                0 => &mut msg.iv,
                1 => &mut msg.ciphertext,
                _ => &mut msg.tag,
            };
            let bit = rng.gen_range(0..field.len() * 8);
            field[bit / 8] ^= 1 << (bit % 8);

            assert!(matches!(env.open(&msg), Err(EnvelopeError::Tamper)));
        }
    }

    #[test]
    fn test_truncated_tag_is_tamper() {
        let env = Envelope::new();
        let mut msg = env.seal("hello").unwrap();
        msg.tag.truncate(16);
        assert!(matches!(env.open(&msg), Err(EnvelopeError::Tamper)));
    }

    #[test]
    fn test_other_key_is_tamper() {
        let a = Envelope::new();
        let b = Envelope::new();
        let msg = a.seal("secret").unwrap();
        assert!(matches!(b.open(&msg), Err(EnvelopeError::Tamper)));
    }

    #[test]
    fn test_reseed_invalidates_old_messages() {
        let mut env = Envelope::new();
        let msg = env.seal("before").unwrap();
        let preview = env.key_preview();
        env.reseed();
        assert_ne!(env.key_preview(), preview);
        assert!(matches!(env.open(&msg), Err(EnvelopeError::Tamper)));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        // Seal raw bytes by hand under the same key layout
        let key = SessionKey::from_bytes([3u8; 32]);
        let env = Envelope::with_key(key.clone());
        let iv = [9u8; IV_LEN];
        let raw = [0x66, 0x6f, 0xff, 0xfe, 0x6f];
        let mut buf = vec![0u8; raw.len() + IV_LEN];
        buf[..raw.len()].copy_from_slice(&raw);
        let ciphertext = CbcEncryptor::new_from_slices(&key.derive(ENC_PURPOSE), &iv)
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buf, raw.len())
            .unwrap()
            .to_vec();
        let tag = env.mac(&iv, &ciphertext).unwrap().finalize().into_bytes().to_vec();
        let msg = SealedMessage { iv: iv.to_vec(), ciphertext, tag };

        assert_eq!(env.open(&msg).unwrap(), "fo\u{fffd}\u{fffd}o");
        assert!(matches!(env.open_strict(&msg), Err(EnvelopeError::Decode(_))));
    }

    #[test]
    fn test_bad_padding_is_decode_error() {
        let env = Envelope::new();
        let mut block = [b'a'; IV_LEN];
        block[IV_LEN - 1] = 0;
        let msg = env.seal_unpadded_block(block);
        assert!(matches!(env.open(&msg), Err(EnvelopeError::Decode(_))));
    }

    #[test]
    fn test_wire_form() {
        let env = Envelope::new();
        let msg = env.seal("whoami").unwrap();
        let json = msg.to_json().unwrap();
        let parsed = SealedMessage::from_json(&json).unwrap();
        assert_eq!(env.open(&parsed).unwrap(), "whoami");
        assert!(SealedMessage::from_json("{\"iv\":\"zz\"}").is_err());
    }
}
