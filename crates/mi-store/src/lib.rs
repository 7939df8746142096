//! # mi-store
//!
//! `LocalStore` (spec §4.7): durable, per-account, encrypted storage for
//! history, attachment manifest, pending-outgoing queue, trust pins,
//! identity keys, and session state.
//!
//! Layout on disk, one directory per account:
//!
//! ```text
//! <data_dir>/<username>/
//!   identity.bin        identity key material, secure-store wrapped
//!   pins.log            trust events (pin_added | pin_replaced | pin_revoked)
//!   history.log         normalized Message records, one per append
//!   pending.log         PendingOutgoing events (enqueue | attempt | remove)
//!   attachments/<file_id>  ciphertext blobs
//!   attachments.log      attachment manifest
//! ```

pub mod atomic;
pub mod error;
pub mod local_store;
pub mod store {
    pub mod attachments;
    pub mod history;
    pub mod identity;
    pub mod pending;
    pub mod trust;
}

pub use error::StoreError;
pub use local_store::LocalStore;
