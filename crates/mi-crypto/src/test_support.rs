//! Deterministic in-memory `Crypto` implementation for tests.
//!
//! This is NOT a real AEAD construction — it exists purely so the rest of
//! the workspace (`mi-store`, `mi-client`) can be exercised end-to-end
//! without linking a production crypto backend, per spec §1's "raw
//! cryptographic primitives ... consumed via a `Crypto` trait".

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::traits::{AeadCiphertext, Crypto, CryptoError};

fn keystream(key: &[u8; 32], nonce: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(nonce);
        hasher.update(counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn tag_for(key: &[u8; 32], aad: &[u8], ciphertext: &[u8]) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(aad);
    hasher.update(ciphertext);
    let digest = hasher.finalize();
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&digest[..16]);
    tag
}

/// An in-memory stand-in for the real `Crypto` backend. `derive_message_key`
/// keeps a per-conversation counter so repeated calls for the same
/// conversation id in one test produce distinct keys, mimicking ratchet
/// advancement without implementing a real Double Ratchet.
pub struct InMemoryCrypto {
    ratchet_counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryCrypto {
    pub fn new() -> Self {
        InMemoryCrypto {
            ratchet_counters: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl Crypto for InMemoryCrypto {
    fn seal(&self, key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> Result<AeadCiphertext, CryptoError> {
        let mut nonce = vec![0u8; 24];
        rand::rng().fill_bytes(&mut nonce);
        let ks = keystream(key, &nonce, plaintext.len());
        let mut ciphertext: Vec<u8> = plaintext.iter().zip(ks.iter()).map(|(p, k)| p ^ k).collect();
        let tag = tag_for(key, aad, &ciphertext);
        ciphertext.extend_from_slice(&tag);
        Ok(AeadCiphertext { nonce, ciphertext })
    }

    fn open(&self, key: &[u8; 32], aad: &[u8], sealed: &AeadCiphertext) -> Result<Vec<u8>, CryptoError> {
        if sealed.ciphertext.len() < 16 {
            return Err(CryptoError::TagMismatch);
        }
        let split_at = sealed.ciphertext.len() - 16;
        let (ct, tag) = sealed.ciphertext.split_at(split_at);
        let expected = tag_for(key, aad, ct);
        if expected != tag {
            return Err(CryptoError::TagMismatch);
        }
        let ks = keystream(key, &sealed.nonce, ct.len());
        Ok(ct.iter().zip(ks.iter()).map(|(c, k)| c ^ k).collect())
    }

    fn derive_message_key(&self, conversation_id: &str) -> Result<[u8; 32], CryptoError> {
        let mut counters = self.ratchet_counters.lock().unwrap();
        let counter = counters.entry(conversation_id.to_string()).or_insert(0);
        let mut hasher = Sha256::new();
        hasher.update(b"ratchet");
        hasher.update(conversation_id.as_bytes());
        hasher.update(counter.to_le_bytes());
        *counter += 1;
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(key)
    }

    fn generate_identity_keypair(&self) -> Result<Vec<u8>, CryptoError> {
        let mut pub_key = vec![0u8; 32];
        rand::rng().fill_bytes(&mut pub_key);
        Ok(pub_key)
    }
}
