use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::wire::{Codec, Frame, FrameBuffer};

use super::{TransportBackend, TransportError};

const READ_CHUNK: usize = 16 * 1024;

/// A transport over any `AsyncRead + AsyncWrite`, such as a TCP socket.
/// Frames are encoded/decoded against the wire grammar via [`Codec`] and
/// [`FrameBuffer`].
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<Inner>,
}

struct Inner {
    reader: Mutex<ReaderState>,
    writer: Mutex<Box<dyn AsyncWriteHalf>>,
    closed: std::sync::atomic::AtomicBool,
}

struct ReaderState {
    io: Box<dyn AsyncReadHalf>,
    buffer: FrameBuffer,
}

// Object-safe halves so `StreamTransport` doesn't need to be generic; the
// underlying I/O type is erased once behind `Box<dyn ...>`.
trait AsyncReadHalf: tokio::io::AsyncRead + Unpin + Send {}
impl<T: tokio::io::AsyncRead + Unpin + Send> AsyncReadHalf for T {}
trait AsyncWriteHalf: tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncWrite + Unpin + Send> AsyncWriteHalf for T {}

impl StreamTransport {
    pub fn new<S>(io: S, max_partial_frame: usize) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        StreamTransport {
            inner: Arc::new(Inner {
                reader: Mutex::new(ReaderState {
                    io: Box::new(read_half),
                    buffer: FrameBuffer::new(max_partial_frame),
                }),
                writer: Mutex::new(Box::new(write_half)),
                closed: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }
}

impl TransportBackend for StreamTransport {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut bytes = Vec::new();
        Codec::encode_frame(&frame, &mut bytes);
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&bytes).await.map_err(|_| TransportError::Closed)?;
        writer.flush().await.map_err(|_| TransportError::Closed)
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        let mut reader = self.inner.reader.lock().await;
        loop {
            if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            match reader.buffer.next_frame() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) => return Err(TransportError::Protocol(e)),
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = reader
                .io
                .read(&mut chunk)
                .await
                .map_err(|_| TransportError::Closed)?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            reader.buffer.fill(&chunk[..n]);
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, std::sync::atomic::Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}
