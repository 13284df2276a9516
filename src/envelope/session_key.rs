//! Session key material

use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32 bytes of symmetric key material, owned by one [`super::Envelope`].
///
/// Never serialized. Only [`SessionKey::preview`] leaves the envelope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub const LEN: usize = 32;

    pub fn generate() -> Self {
        Self(rand::random::<[u8; 32]>())
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Truncated hash of the key, safe to print (16 hex chars)
    pub fn preview(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.0);
        h.update(b"threatloop-key-preview-v1");
        hex::encode(&h.finalize()[..8])
    }

    /// Derive a purpose-bound subkey so the cipher and MAC never share a key
    pub(crate) fn derive(&self, purpose: &[u8]) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(self.0);
        h.update(purpose);
        h.finalize().into()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({}…)", self.preview())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_is_stable_and_short() {
        let key = SessionKey::from_bytes([7u8; 32]);
        assert_eq!(key.preview(), key.preview());
        assert_eq!(key.preview().len(), 16);
        assert!(!key.preview().contains(&hex::encode([7u8; 8])));
    }

    #[test]
    fn test_subkeys_differ() {
        let key = SessionKey::generate();
        assert_ne!(key.derive(b"enc"), key.derive(b"mac"));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SessionKey::from_bytes([0xab; 32]);
        let dbg = format!("{:?}", key);
        assert!(!dbg.contains("abababab"));
    }
}
