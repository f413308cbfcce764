//! Profile registration: maps a profile URI to the handlers invoked when a
//! channel using it starts, closes, or receives a frame.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::ReplyCode;
use crate::reply::ReplyPayload;
use crate::sequencer::PayloadSource;
use crate::session::ConnectionInner;

/// Decision returned from a profile's start handler: accept (optionally
/// with piggybacked `<profile>` content to echo back) or refuse with an
/// RFC reply code.
pub enum StartDecision {
    Accept { piggyback: Option<Bytes> },
    Refuse { code: crate::error::ReplyCode, diagnostic: String },
}

pub type StartHandler =
    Arc<dyn Fn(u32, Option<&[u8]>) -> StartDecision + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(u32) -> Result<(), crate::error::ReplyCode> + Send + Sync>;
pub type FrameHandler = Arc<dyn Fn(MessageContext, &[u8]) + Send + Sync>;

/// Handed to a profile's frame handler along with the inbound MSG payload:
/// the only way to reply is through this, so a handler cannot forget to
/// (or accidentally reply twice, since each method consumes `self`).
pub struct MessageContext {
    conn: Arc<ConnectionInner>,
    channel: u32,
    msg_no: u32,
    arrival_index: u64,
}

impl MessageContext {
    pub(crate) fn new(conn: Arc<ConnectionInner>, channel: u32, msg_no: u32, arrival_index: u64) -> Self {
        MessageContext { conn, channel, msg_no, arrival_index }
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn msg_no(&self) -> u32 {
        self.msg_no
    }

    pub fn reply_rpy(self, payload: Bytes) {
        self.submit(ReplyPayload::Rpy(PayloadSource::Bytes(payload)));
    }

    pub fn reply_err(self, code: ReplyCode, diagnostic: impl Into<String>) {
        let text = format!("{} {}", code.as_u16(), diagnostic.into());
        self.submit(ReplyPayload::Err(PayloadSource::Bytes(Bytes::from(text))));
    }

    /// Reply with a stream of ANS frames followed by the terminating NUL.
    pub fn reply_ans_then_nul(self, frames: Vec<Bytes>) {
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(i, b)| (i as u32, PayloadSource::Bytes(b)))
            .collect();
        self.submit(ReplyPayload::AnsThenNul(frames));
    }

    fn submit(self, payload: ReplyPayload) {
        let mut scheds = self.conn.reply_schedulers.lock();
        let sched = scheds.entry(self.channel).or_default();
        if sched.submit(self.msg_no, self.arrival_index, payload).is_err() {
            tracing::warn!(channel = self.channel, msg_no = self.msg_no, "profile handler replied twice");
        }
    }
}

/// Everything registered for one profile URI.
#[derive(Clone)]
pub struct ProfileEntry {
    pub uri: String,
    pub start_handler: StartHandler,
    pub close_handler: CloseHandler,
    pub frame_handler: FrameHandler,
}

/// Interns profile registrations for a peer. Registration happens once,
/// typically at startup, before any connection is accepted or dialed.
#[derive(Clone, Default)]
pub struct ProfileRegistry {
    entries: HashMap<String, ProfileEntry>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        ProfileRegistry::default()
    }

    pub fn register(
        &mut self,
        uri: impl Into<String>,
        start_handler: StartHandler,
        close_handler: CloseHandler,
        frame_handler: FrameHandler,
    ) {
        let uri = uri.into();
        self.entries.insert(
            uri.clone(),
            ProfileEntry {
                uri,
                start_handler,
                close_handler,
                frame_handler,
            },
        );
    }

    pub fn get(&self, uri: &str) -> Option<&ProfileEntry> {
        self.entries.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.entries.contains_key(uri)
    }

    /// First registered profile, in the order a `<start>` offer should try
    /// them, that this registry also supports.
    pub fn first_supported<'a>(&self, offered: impl Iterator<Item = &'a str>) -> Option<&str> {
        for uri in offered {
            if self.entries.contains_key(uri) {
                return Some(uri);
            }
        }
        None
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
