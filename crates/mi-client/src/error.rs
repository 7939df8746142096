//! Boundary conversions from component-local errors into `mi_core::Error`,
//! each wrapped with a short context string per the §7 propagation policy.

use mi_core::Error;

pub fn into_core_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{context}: {err}"))
}

/// Every wire payload in `crate::wire` round-trips through these two
/// helpers so call sites never juggle `serde_json::Error` directly.
pub fn encode_frame<T: serde::Serialize>(value: &T) -> mi_core::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| into_core_error("encode frame", e))
}

pub fn decode_frame<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> mi_core::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| into_core_error("decode frame", e))
}

pub fn crypto_error(context: &str, err: mi_crypto::CryptoError) -> Error {
    tracing::warn!(context, "crypto operation failed");
    let _ = err;
    Error::Crypto
}

pub fn store_error(context: &str, err: mi_store::StoreError) -> Error {
    Error::Storage(format!("{context}: {err}"))
}

/// Transport-hint augmentation (§4.3): a pure string transformation that
/// must never change the underlying classification.
pub fn augment_transport_message(message: &str, require_tls: bool) -> String {
    if require_tls && message.contains("tcp recv failed") {
        format!("{message} (hint: server requires TLS; check [client] use_tls/require_tls)")
    } else {
        message.to_string()
    }
}
