//! The public connection handle: wraps a [`ConnectionInner`], owns the
//! reader/writer tasks, and correlates replies back to `send_msg` callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beep_core::error::{BeepError, OperationError, ReplyCode};
use beep_core::events::EventQueue;
use beep_core::greeting::{ManagementMessage, ProfileOffer};
use beep_core::reader::{self, Delivery};
use beep_core::reassembly::Delivered;
use beep_core::registry::ProfileRegistry;
use beep_core::sequencer::{OutboundJob, PayloadSource};
use beep_core::session::{render, ConnectionInner, Role};
use beep_core::transport::Transport;
use beep_core::wire::FrameType;
use beep_core::PeerConfig;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One outcome for a MSG we sent: its final reply, or the full sequence of
/// ANS frames it produced before the terminating NUL.
#[derive(Debug)]
pub enum Reply {
    Rpy(Bytes),
    Err { code: ReplyCode, diagnostic: String },
    AnsStream(Vec<(u32, Bytes)>),
}

enum PendingKind {
    Reply(oneshot::Sender<Reply>),
    AnsAccum {
        frames: Vec<(u32, Bytes)>,
        done: oneshot::Sender<Reply>,
    },
}

type PendingMap = Arc<Mutex<HashMap<(u32, u32), PendingKind>>>;

/// A connected BEEP peer: owns the reader/writer tasks and exposes the
/// channel-zero and per-channel operations applications actually call.
pub struct Peer {
    inner: Arc<ConnectionInner>,
    pending: PendingMap,
    reader_task: JoinHandle<BeepError>,
    writer_task: JoinHandle<BeepError>,
}

impl Peer {
    /// Wrap an already-established transport, start the reader/writer
    /// tasks, and send our greeting.
    pub fn handshake(role: Role, transport: Transport, config: PeerConfig, registry: ProfileRegistry) -> Self {
        let events = EventQueue::new(256);
        let sender = events.sender();
        let inner = ConnectionInner::new(role, transport, config, registry, sender);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_inner = inner.clone();
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            reader::run(reader_inner, move |delivery| {
                if let Delivery::InboundReply(delivered) = delivery {
                    dispatch_reply(&reader_pending, delivered);
                }
            })
            .await
        });

        let writer_inner = inner.clone();
        let writer_task = tokio::spawn(async move { beep_core::writer::run(writer_inner).await });

        let greeting = inner.greeting_message();
        // Channel zero's own msg_no 0 is always free on a brand-new session.
        let _ = enqueue_management(&inner, 0, &greeting);

        Peer { inner, pending, reader_task, writer_task }
    }

    /// Request a new channel offering `profile_uris` in preference order.
    /// Resolves once `<ok>`/`<error>` comes back from the peer.
    pub async fn start_channel(&self, profile_uris: &[&str]) -> Result<u32, OperationError> {
        let channel = self.inner.allocate_channel_number();
        let profiles = profile_uris
            .iter()
            .map(|uri| ProfileOffer { uri: uri.to_string(), piggyback: None })
            .collect();
        let msg = ManagementMessage::Start { channel, profiles };
        let first_profile = profile_uris.first().map(|s| s.to_string()).unwrap_or_default();
        let inner = self.inner.clone();
        match self
            .request_channel_zero(msg, move |msg_no| inner.note_pending_start(msg_no, channel, first_profile))
            .await?
        {
            Reply::Rpy(_) => Ok(channel),
            Reply::Err { code, diagnostic } => Err(OperationError::Refused { code, diagnostic }),
            Reply::AnsStream(_) => Err(OperationError::Refused {
                code: ReplyCode::SyntaxError,
                diagnostic: "unexpected ANS stream replying to <start>".into(),
            }),
        }
    }

    /// Request that `channel` be closed. Refused if it still has MSGs
    /// outstanding in either direction.
    pub async fn close_channel(&self, channel: u32) -> Result<(), OperationError> {
        let msg = ManagementMessage::Close { channel, code: ReplyCode::Ok.as_u16(), diagnostic: None };
        let inner = self.inner.clone();
        match self
            .request_channel_zero(msg, move |msg_no| inner.note_pending_close(msg_no, channel))
            .await?
        {
            Reply::Rpy(_) => Ok(()),
            Reply::Err { code, diagnostic } => Err(OperationError::Refused { code, diagnostic }),
            Reply::AnsStream(_) => Err(OperationError::Refused {
                code: ReplyCode::SyntaxError,
                diagnostic: "unexpected ANS stream replying to <close>".into(),
            }),
        }
    }

    /// Send a MSG on `channel` and wait for its reply: one RPY, one ERR, or
    /// the full ANS stream collected up to its terminating NUL.
    pub async fn send_msg(&self, channel: u32, payload: Bytes) -> Result<Reply, OperationError> {
        let msg_no = {
            let mut channels = self.inner.channels.lock();
            let ch = channels.get_mut(&channel).ok_or(OperationError::ChannelClosed)?;
            if !ch.is_usable() {
                return Err(OperationError::ChannelClosed);
            }
            ch.allocate_msg_no().map_err(|_| OperationError::OutstandingLimitReached)?
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert((channel, msg_no), PendingKind::Reply(tx));

        {
            let mut sequencer = self.inner.sequencer.lock();
            sequencer
                .enqueue(OutboundJob::new(channel, msg_no, FrameType::Msg, None, PayloadSource::Bytes(payload)))
                .map_err(|_| OperationError::OutstandingLimitReached)?;
        }

        rx.await.map_err(|_| OperationError::ConnectionClosed)
    }

    async fn request_channel_zero(
        &self,
        msg: ManagementMessage,
        note: impl FnOnce(u32),
    ) -> Result<Reply, OperationError> {
        let msg_no = {
            let mut channels = self.inner.channels.lock();
            let ch = channels.get_mut(&0).expect("channel zero always exists");
            ch.allocate_msg_no().map_err(|_| OperationError::OutstandingLimitReached)?
        };
        note(msg_no);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert((0, msg_no), PendingKind::Reply(tx));
        enqueue_management(&self.inner, msg_no, &msg)?;
        tokio::time::timeout(self.inner.config.start_timeout, rx)
            .await
            .map_err(|_| OperationError::Timeout)?
            .map_err(|_| OperationError::ConnectionClosed)
    }

    /// The underlying connection state, for advanced callers (metrics,
    /// direct profile registration against an already-running session).
    pub fn handle(&self) -> Arc<ConnectionInner> {
        self.inner.clone()
    }

    /// Abort the reader/writer tasks and close the transport.
    pub fn shutdown(self) {
        self.inner.transport().close();
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

fn dispatch_reply(pending: &PendingMap, delivered: Delivered) {
    let key = (delivered.channel, delivered.msg_no);
    match delivered.frame_type {
        FrameType::Rpy => complete(pending, key, Reply::Rpy(delivered.payload)),
        FrameType::Err => {
            let text = String::from_utf8_lossy(&delivered.payload).to_string();
            let code = text
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<u16>().ok())
                .and_then(ReplyCode::from_u16)
                .unwrap_or(ReplyCode::TransactionFailed);
            let diagnostic = text.splitn(2, char::is_whitespace).nth(1).unwrap_or(&text).trim().to_string();
            complete(pending, key, Reply::Err { code, diagnostic });
        }
        FrameType::Ans => {
            let mut pending = pending.lock();
            let ans_no = delivered.ans_no.unwrap_or(0);
            match pending.remove(&key) {
                Some(PendingKind::Reply(done)) => {
                    pending.insert(key, PendingKind::AnsAccum { frames: vec![(ans_no, delivered.payload)], done });
                }
                Some(PendingKind::AnsAccum { mut frames, done }) => {
                    frames.push((ans_no, delivered.payload));
                    pending.insert(key, PendingKind::AnsAccum { frames, done });
                }
                None => {}
            }
        }
        FrameType::Nul => {
            if let Some(PendingKind::AnsAccum { frames, done }) = pending.lock().remove(&key) {
                let _ = done.send(Reply::AnsStream(frames));
            }
        }
        FrameType::Msg | FrameType::Seq => {}
    }
}

fn complete(pending: &PendingMap, key: (u32, u32), reply: Reply) {
    if let Some(PendingKind::Reply(tx)) = pending.lock().remove(&key) {
        let _ = tx.send(reply);
    }
}

fn enqueue_management(
    inner: &Arc<ConnectionInner>,
    msg_no: u32,
    msg: &ManagementMessage,
) -> Result<(), OperationError> {
    let payload = render(msg);
    inner
        .sequencer
        .lock()
        .enqueue(OutboundJob::new(0, msg_no, FrameType::Msg, None, PayloadSource::Bytes(payload)))
        .map_err(|_| OperationError::OutstandingLimitReached)
}

/// Default timeout for channel-zero round trips when a caller builds a
/// [`PeerConfig`] without overriding `start_timeout`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
