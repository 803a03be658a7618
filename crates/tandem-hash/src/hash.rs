use sha3::{Digest, Sha3_256};
use tandem_types::Hash32;

/// Compute SHA3-256 over arbitrary bytes.
pub fn sha3_256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Helper for domain-separated hashing:
/// H(tag || body)
pub fn sha3_256_tagged(tag: &str, body: &[u8]) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update(tag.as_bytes());
    hasher.update(body);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// First ten hex characters of a hash, for log lines and display impls.
pub fn short_hex(hash: &Hash32) -> String {
    hex::encode(&hash[..5])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_hash_differs_from_untagged() {
        let body = b"payload";
        assert_ne!(sha3_256(body), sha3_256_tagged("TAG", body));
    }

    #[test]
    fn short_hex_is_ten_chars() {
        let h = sha3_256(b"x");
        assert_eq!(short_hex(&h).len(), 10);
    }
}
