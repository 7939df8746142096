//! An in-memory loopback `Transport` for tests — no sockets, deterministic,
//! and able to simulate both "network down" (§8 scenario S3) and
//! server-reported protocol failures (§8 scenario S4) without needing a
//! real TCP/TLS/KCP backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::frame::Frame;
use crate::traits::{Transport, TransportError, TransportStream};

type Responder = Box<dyn Fn(&Frame) -> Result<Frame, TransportError> + Send + Sync>;

/// A canned mock transport. Queue responses with `push_response`, or install
/// a fallback responder with `set_default_responder` for methods the test
/// doesn't care to script individually.
pub struct MockTransport {
    queued: Mutex<VecDeque<Result<Frame, TransportError>>>,
    default_responder: Mutex<Option<Responder>>,
    network_up: AtomicBool,
    presented_fingerprint: Mutex<Option<[u8; 32]>>,
    sent: Mutex<Vec<Frame>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            queued: Mutex::new(VecDeque::new()),
            default_responder: Mutex::new(None),
            network_up: AtomicBool::new(true),
            presented_fingerprint: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: Result<Frame, TransportError>) {
        self.queued.lock().unwrap().push_back(response);
    }

    pub fn set_default_responder(&self, f: impl Fn(&Frame) -> Result<Frame, TransportError> + Send + Sync + 'static) {
        *self.default_responder.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_network_up(&self, up: bool) {
        self.network_up.store(up, Ordering::SeqCst);
    }

    pub fn set_presented_fingerprint(&self, fp: Option<[u8; 32]>) {
        *self.presented_fingerprint.lock().unwrap() = fp;
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct EmptyStream;

#[async_trait::async_trait]
impl TransportStream for EmptyStream {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, frame: Frame) -> Result<Frame, TransportError> {
        self.sent.lock().unwrap().push(frame.clone());

        if !self.network_up.load(Ordering::SeqCst) {
            return Err(TransportError::Io("tcp recv failed".to_string()));
        }

        if let Some(resp) = self.queued.lock().unwrap().pop_front() {
            return resp;
        }

        if let Some(responder) = self.default_responder.lock().unwrap().as_ref() {
            return responder(&frame);
        }

        Ok(Frame::new(frame.method.clone(), Vec::new()))
    }

    async fn request_stream(
        &self,
        _frame: Frame,
    ) -> Result<Box<dyn TransportStream>, TransportError> {
        Ok(Box::new(EmptyStream))
    }

    fn presented_fingerprint(&self) -> Option<[u8; 32]> {
        *self.presented_fingerprint.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn network_down_surfaces_io_error() {
        let t = MockTransport::new();
        t.set_network_up(false);
        let err = t.send_request(Frame::new("send", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn queued_response_is_returned_once() {
        let t = MockTransport::new();
        t.push_response(Ok(Frame::new("ok", b"first".to_vec())));
        let resp = t.send_request(Frame::new("send", vec![])).await.unwrap();
        assert_eq!(resp.body, b"first");
    }
}
