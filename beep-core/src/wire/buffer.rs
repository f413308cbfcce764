//! Per-connection inbound byte buffer.
//!
//! Single-consumer (the reader loop); no internal synchronization.

use bytes::BytesMut;

use super::codec::{Codec, CodecError, Parsed};
use super::frame::Frame;
use crate::error::ProtocolError;

/// Accumulates transport bytes and repeatedly drives the codec, bounding
/// memory use against a configured maximum partial-frame size.
pub struct FrameBuffer {
    buf: BytesMut,
    max_partial_frame: usize,
}

impl FrameBuffer {
    pub fn new(max_partial_frame: usize) -> Self {
        FrameBuffer {
            buf: BytesMut::with_capacity(8192),
            max_partial_frame,
        }
    }

    /// Append bytes read from the transport.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if any.
    ///
    /// Returns `Ok(None)` when more transport bytes are needed. Returns
    /// `Err` when the buffer holds a malformed frame or has grown past
    /// `max_partial_frame` without completing one — both are connection-fatal.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match Codec::parse_frame(&self.buf) {
            Ok(Parsed::Complete { frame, consumed }) => {
                let _ = self.buf.split_to(consumed);
                Ok(Some(frame))
            }
            Ok(Parsed::Need(_)) => {
                if self.buf.len() > self.max_partial_frame {
                    return Err(ProtocolError::FrameTooLarge {
                        limit: self.max_partial_frame,
                        got: self.buf.len(),
                    });
                }
                Ok(None)
            }
            Err(CodecError::BadTrailer) => Err(ProtocolError::BadTrailer),
            Err(CodecError::BadHeader(reason)) => {
                Err(ProtocolError::BadHeader(reason.to_string()))
            }
            Err(CodecError::BadField(reason)) => Err(ProtocolError::BadHeader(format!(
                "field out of range: {reason}"
            ))),
        }
    }

    /// Drain every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Result<Vec<Frame>, ProtocolError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}
