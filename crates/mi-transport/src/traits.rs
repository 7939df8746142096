//! The `Transport` external collaborator boundary.

use crate::frame::Frame;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Io(String),
    #[error("connection closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("pending server trust required")]
    PendingServerTrust,
    #[error("pending peer trust required")]
    PendingPeerTrust,
}

impl TransportError {
    /// The raw message a `SendPipeline` classifies per §4.3. Trust-gate
    /// variants are handled structurally, never via string matching.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// A streamed response from `request_stream` (e.g. a long poll or file
/// download channel).
#[async_trait::async_trait]
pub trait TransportStream: Send {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Wire transport: TCP/TLS/KCP are consumed exclusively through this trait.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_request(&self, frame: Frame) -> Result<Frame, TransportError>;

    async fn request_stream(
        &self,
        frame: Frame,
    ) -> Result<Box<dyn TransportStream>, TransportError>;

    /// The fingerprint of the certificate/public key presented by the peer
    /// on the most recent handshake, if the transport has one (used by
    /// `TrustEngine`).
    fn presented_fingerprint(&self) -> Option<[u8; 32]>;
}
