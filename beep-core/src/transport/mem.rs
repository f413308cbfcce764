use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::wire::Frame;

use super::{TransportBackend, TransportError};

const CHANNEL_CAPACITY: usize = 64;

/// An in-process transport backed by a pair of bounded `mpsc` channels.
/// Frames are handed across directly, with no wire encoding, which is what
/// makes this useful for tests: it exercises everything above the codec
/// without needing a real socket.
#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::Sender<Frame>,
    rx: Mutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Arc::new(Inner {
            tx: tx_b,
            rx: Mutex::new(rx_a),
            closed: AtomicBool::new(false),
        });
        let b = Arc::new(Inner {
            tx: tx_a,
            rx: Mutex::new(rx_b),
            closed: AtomicBool::new(false),
        });

        (MemTransport { inner: a }, MemTransport { inner: b })
    }
}

impl TransportBackend for MemTransport {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.inner.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::FrameType;
    use bytes::Bytes;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (a, b) = MemTransport::pair();
        let frame = Frame::data(FrameType::Msg, 1, 0, false, 0, Bytes::from_static(b"hi"), None);
        a.send_frame(frame.clone()).await.unwrap();
        let got = b.recv_frame().await.unwrap();
        assert_eq!(got, frame);
    }

    #[tokio::test]
    async fn closing_one_side_fails_the_other() {
        let (a, b) = MemTransport::pair();
        a.close();
        let frame = Frame::data(FrameType::Msg, 1, 0, false, 0, Bytes::new(), None);
        assert!(a.send_frame(frame).await.is_err());
        drop(a);
        assert!(b.recv_frame().await.is_err());
    }
}
