//! External collaborator boundaries.
//!
//! `Crypto` is consumed by `SessionManager` (OPAQUE-style PAKE), by
//! `SendPipeline` (Double-Ratchet / group sender-key AEAD sealing), and by
//! `GroupCallKeyAgent` (sealing rotated call keys to members). `KtVerifier`
//! is consumed by `TrustEngine` when key-transparency is enabled
//! (`[kt] require_signature=1`).
//!
//! Neither trait is implemented in production code in this workspace — the
//! host links a real backend (libsodium/ring/RustCrypto bindings, a
//! key-transparency client). `mi-crypto::test_support` provides a
//! deterministic in-memory stand-in so the rest of the workspace can be
//! exercised in tests.

use mi_core::ids::Fingerprint;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("AEAD seal failed")]
    SealFailed,
    #[error("AEAD tag mismatch")]
    TagMismatch,
    #[error("key derivation failed")]
    KeyDerivationFailed,
    #[error("PAKE exchange failed")]
    PakeFailed,
}

/// A sealed AEAD ciphertext plus the nonce it was sealed under.
#[derive(Debug, Clone)]
pub struct AeadCiphertext {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Raw cryptographic primitives, consumed as an external collaborator.
pub trait Crypto: Send + Sync {
    /// Seal `plaintext` with associated data `aad` under `key`.
    fn seal(&self, key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> Result<AeadCiphertext, CryptoError>;

    /// Open a ciphertext sealed by `seal` with the same `key`/`aad`.
    fn open(&self, key: &[u8; 32], aad: &[u8], sealed: &AeadCiphertext) -> Result<Vec<u8>, CryptoError>;

    /// Derive a fresh per-message symmetric key from the active ratchet
    /// state for `conversation_id` (Double-Ratchet or group sender key).
    fn derive_message_key(&self, conversation_id: &str) -> Result<[u8; 32], CryptoError>;

    /// Generate a fresh X25519 key pair, returning the raw public key.
    fn generate_identity_keypair(&self) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KtVerifyError {
    #[error("key transparency log entry missing")]
    Missing,
    #[error("key transparency signature invalid")]
    BadSignature,
}

/// Key-transparency log verification, consumed as an external collaborator.
pub trait KtVerifier: Send + Sync {
    fn verify(&self, username: &str, identity_pub: &[u8], fingerprint: &Fingerprint) -> Result<(), KtVerifyError>;
}
