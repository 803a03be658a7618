//! Secret key material.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Suite-specific secret key bytes, wiped on drop.
///
/// Kept opaque so the configuration and core stay agnostic of the
/// signature suite; the suite implementation interprets the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        SecretKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "SecretKey(<{} bytes>)", self.0.len())
    }
}
