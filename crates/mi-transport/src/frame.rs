//! Wire frame: an opaque, already-sealed payload plus a method tag the
//! transport uses for routing. Framing/serialization details below the
//! `Transport` boundary belong to the transport implementation, not here.

#[derive(Debug, Clone)]
pub struct Frame {
    pub method: String,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(method: impl Into<String>, body: Vec<u8>) -> Self {
        Frame {
            method: method.into(),
            body,
        }
    }
}
