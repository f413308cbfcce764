//! Inbound multi-frame message reassembly.

use bytes::{Bytes, BytesMut};

use crate::wire::{FrameIdentity, FrameType};

/// A message being assembled from one or more fragments sharing the same
/// `(channel, msg_no, type, ans_no)` identity.
#[derive(Debug)]
pub struct PartialMessage {
    identity: FrameIdentity,
    buf: BytesMut,
}

impl PartialMessage {
    pub fn new(identity: FrameIdentity) -> Self {
        PartialMessage {
            identity,
            buf: BytesMut::new(),
        }
    }

    pub fn identity(&self) -> FrameIdentity {
        self.identity
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// A fully reassembled message ready for delivery.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub channel: u32,
    pub msg_no: u32,
    pub frame_type: FrameType,
    pub ans_no: Option<u32>,
    pub payload: Bytes,
    /// MIME entity headers, i.e. everything before the first CR-LF CR-LF in
    /// `payload`. Empty when no such boundary is found, in which case the
    /// caller should assume the implied defaults (`Content-Type:
    /// application/octet-stream`, `Content-Transfer-Encoding: binary`).
    pub headers: Bytes,
    /// The entity body, i.e. everything after the first CR-LF CR-LF in
    /// `payload`. Equal to `payload` itself when no boundary is found.
    pub body: Bytes,
}

impl Delivered {
    pub fn new(channel: u32, msg_no: u32, frame_type: FrameType, ans_no: Option<u32>, payload: Bytes) -> Self {
        let (headers, body) = split_header_body(&payload);
        Delivered { channel, msg_no, frame_type, ans_no, payload, headers, body }
    }
}

/// Locate the CR-LF CR-LF entity boundary (RFC 822/MIME-style framing); the
/// core goes no further than this split, per spec — actual MIME semantics
/// are a consumer concern. A payload of exactly "\r\n" is the documented
/// empty-entity case: no headers, no body. No boundary at all means the
/// whole payload is body with no headers area.
fn split_header_body(payload: &Bytes) -> (Bytes, Bytes) {
    if payload.as_ref() == b"\r\n" {
        return (Bytes::new(), Bytes::new());
    }
    const BOUNDARY: &[u8] = b"\r\n\r\n";
    match payload.windows(BOUNDARY.len()).position(|w| w == BOUNDARY) {
        Some(pos) => (payload.slice(..pos), payload.slice(pos + BOUNDARY.len()..)),
        None => (Bytes::new(), payload.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_finishes() {
        let id = FrameIdentity {
            channel: 1,
            msg_no: 0,
            frame_type: FrameType::Msg,
            ans_no: 0,
        };
        let mut msg = PartialMessage::new(id);
        msg.append(b"hello ");
        msg.append(b"world");
        assert_eq!(msg.len(), 11);
        assert_eq!(&msg.finish()[..], b"hello world");
    }

    fn delivered(payload: &'static [u8]) -> Delivered {
        Delivered::new(1, 0, FrameType::Msg, None, Bytes::from_static(payload))
    }

    #[test]
    fn splits_headers_from_body_on_crlfcrlf() {
        let d = delivered(b"Content-Type: text/plain\r\n\r\nhello");
        assert_eq!(&d.headers[..], b"Content-Type: text/plain");
        assert_eq!(&d.body[..], b"hello");
    }

    #[test]
    fn no_boundary_means_whole_payload_is_body() {
        let d = delivered(b"This is a test");
        assert_eq!(&d.headers[..], b"");
        assert_eq!(&d.body[..], b"This is a test");
    }

    #[test]
    fn bare_crlf_is_the_empty_entity() {
        let d = delivered(b"\r\n");
        assert_eq!(&d.headers[..], b"");
        assert_eq!(&d.body[..], b"");
    }
}
