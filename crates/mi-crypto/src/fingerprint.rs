//! Fingerprinting: SHA-256 of a raw public key (§4.2 step 1).

use mi_core::ids::Fingerprint;
use sha2::{Digest, Sha256};

pub fn fingerprint_of(raw_public_key: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(raw_public_key);
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&digest);
    Fingerprint(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint_of(b"some public key bytes");
        let b = fingerprint_of(b"some public key bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_keys() {
        let a = fingerprint_of(b"key one");
        let b = fingerprint_of(b"key two");
        assert_ne!(a, b);
    }
}
