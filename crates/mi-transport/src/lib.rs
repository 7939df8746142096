//! # mi-transport
//!
//! The `Transport` trait boundary named in spec §1: TCP/TLS/KCP wire
//! transports are consumed through `send_request(frame) -> Result<frame>`
//! and `request_stream(frame) -> Result<stream>`. Backpressure on the
//! network socket itself is the transport's concern, not this crate's.

pub mod frame;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use frame::Frame;
pub use traits::{Transport, TransportError, TransportStream};
