//! # mi-client
//!
//! Everything that depends on `mi-crypto`, `mi-transport`, and `mi-store`:
//! `SessionManager`, `TrustEngine`, `SendPipeline`, `EventPoller`,
//! `GroupCallKeyAgent`, `MediaRelay`, the `PendingOutgoing` retry scheduler,
//! `DevicePairing`, and the `Facade` that assembles them for the host.

pub mod calls;
pub mod error;
pub mod facade;
pub mod media;
pub mod pairing;
pub mod pending;
pub mod poller;
pub mod send;
pub mod session;
pub mod trust;
pub mod wire;

pub use error::into_core_error;
pub use facade::Facade;
