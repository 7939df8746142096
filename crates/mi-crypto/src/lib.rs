//! # mi-crypto
//!
//! The `Crypto` and `KtVerifier` trait boundaries named in spec §1: raw
//! AEAD / X25519 / Argon2id / OPAQUE primitives and key-transparency log
//! verification are consumed as external collaborators, not implemented
//! here. This crate owns everything that sits *around* those primitives:
//! the secure-store envelope codec (§4.7), fingerprinting, and SAS
//! derivation (§4.2).

pub mod envelope;
pub mod fingerprint;
pub mod sas;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use envelope::{Envelope, EnvelopeError};
pub use fingerprint::fingerprint_of;
pub use sas::derive_sas;
pub use traits::{AeadCiphertext, Crypto, CryptoError, KtVerifier, KtVerifyError};
