//! Outbound fragmentation, window enforcement, and cross-channel fairness.
//!
//! One `Sequencer` serves a whole connection. Each channel gets its own FIFO
//! of queued sends; a round-robin cursor picks which channel's head job
//! produces the next frame, so one channel streaming a large feeder can't
//! starve the others.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::channel::Channel;
use crate::error::ProtocolError;
use crate::feeder::PayloadFeeder;
use crate::wire::{Frame, FrameType};

/// Where outbound payload bytes come from: an already-materialized buffer,
/// or a lazy feeder polled a chunk at a time.
pub enum PayloadSource {
    Bytes(Bytes),
    Feeder(Box<dyn PayloadFeeder>),
}

impl PayloadSource {
    fn total_remaining_hint(&self) -> Option<u64> {
        match self {
            PayloadSource::Bytes(b) => Some(b.len() as u64),
            PayloadSource::Feeder(f) => f.total_size().map(|t| t.saturating_sub(f.bytes_transferred())),
        }
    }

    /// Pull up to `max_len` bytes. Returns `(chunk, finished)`; an empty,
    /// unfinished chunk means the source has nothing ready right now (a
    /// paused feeder) and the caller should try another channel.
    fn poll(&mut self, max_len: usize) -> (Bytes, bool) {
        match self {
            PayloadSource::Bytes(b) => {
                let take = max_len.min(b.len());
                let chunk = b.split_to(take);
                (chunk, b.is_empty())
            }
            PayloadSource::Feeder(f) => {
                let chunk = f.poll_chunk(max_len);
                (chunk, f.is_finished())
            }
        }
    }
}

/// One queued outbound unit: a MSG, or one frame of a reply (RPY/ERR/ANS),
/// or a NUL terminator.
pub struct OutboundJob {
    pub channel: u32,
    pub msg_no: u32,
    pub frame_type: FrameType,
    pub ans_no: Option<u32>,
    source: Option<PayloadSource>,
    started: bool,
}

impl OutboundJob {
    pub fn new(
        channel: u32,
        msg_no: u32,
        frame_type: FrameType,
        ans_no: Option<u32>,
        source: PayloadSource,
    ) -> Self {
        OutboundJob {
            channel,
            msg_no,
            frame_type,
            ans_no,
            source: Some(source),
            started: false,
        }
    }

    /// A NUL frame (or any other frame with no payload at all) carries no
    /// bytes and completes in a single call.
    pub fn empty(channel: u32, msg_no: u32, frame_type: FrameType, ans_no: Option<u32>) -> Self {
        OutboundJob::new(channel, msg_no, frame_type, ans_no, PayloadSource::Bytes(Bytes::new()))
    }
}

/// Error when queuing exceeds the configured backpressure limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    pub channel: u32,
}

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel {} outbound queue is full", self.channel)
    }
}

impl std::error::Error for QueueFull {}

pub struct Sequencer {
    queues: HashMap<u32, VecDeque<OutboundJob>>,
    ready: VecDeque<u32>,
    max_queue_depth: usize,
}

impl Sequencer {
    pub fn new(max_queue_depth: usize) -> Self {
        Sequencer {
            queues: HashMap::new(),
            ready: VecDeque::new(),
            max_queue_depth,
        }
    }

    pub fn enqueue(&mut self, job: OutboundJob) -> Result<(), QueueFull> {
        let channel = job.channel;
        let queue = self.queues.entry(channel).or_default();
        if queue.len() >= self.max_queue_depth {
            return Err(QueueFull { channel });
        }
        let was_empty = queue.is_empty();
        queue.push_back(job);
        if was_empty {
            self.ready.push_back(channel);
        }
        Ok(())
    }

    /// Enqueue a reply frame without the depth cap. A reply's frames (RPY,
    /// ERR, or an ANS stream plus its terminating NUL) answer a MSG the peer
    /// already sent and is waiting on; once the profile handler has computed
    /// them they must eventually reach the wire; `max_queue_depth` exists to
    /// bound how far an application can get ahead of the peer with fresh
    /// MSGs, not to truncate a reply that's already been promised.
    pub fn enqueue_reply(&mut self, job: OutboundJob) {
        let channel = job.channel;
        let queue = self.queues.entry(channel).or_default();
        let was_empty = queue.is_empty();
        queue.push_back(job);
        if was_empty {
            self.ready.push_back(channel);
        }
    }

    pub fn pending_for(&self, channel: u32) -> usize {
        self.queues.get(&channel).map(VecDeque::len).unwrap_or(0)
    }

    /// Produce the next outbound frame, trying each ready channel once per
    /// call in round-robin order. Returns `None` if every ready channel is
    /// either window-blocked or its head job is a paused feeder with nothing
    /// to give.
    pub fn next_frame(
        &mut self,
        channels: &mut HashMap<u32, Channel>,
        max_frame_size: usize,
    ) -> Result<Option<Frame>, ProtocolError> {
        let rounds = self.ready.len();
        for _ in 0..rounds {
            let channel_no = match self.ready.pop_front() {
                Some(c) => c,
                None => return Ok(None),
            };

            let ch = match channels.get_mut(&channel_no) {
                Some(ch) => ch,
                None => continue, // channel torn down with jobs still queued; drop silently
            };
            let allowed = ch.send_window.allowed_from(ch.next_send_seq) as usize;
            let cap = allowed.min(max_frame_size);

            let queue = self.queues.get_mut(&channel_no).expect("ready implies queue exists");
            let job = match queue.front_mut() {
                Some(j) => j,
                None => continue, // shouldn't happen, ready list is kept in sync
            };

            if cap == 0 && job.source.as_ref().and_then(|s| s.total_remaining_hint()) != Some(0) {
                // Window exhausted: leave this channel's job in place but
                // don't re-add to ready until a SEQ update wakes it.
                continue;
            }

            let source = job.source.as_mut().expect("job always holds a source until completed");
            let (chunk, finished) = source.poll(cap);

            if chunk.is_empty() && !finished {
                // Paused feeder: nothing ready yet. Leave the job in place
                // and try the next ready channel this round.
                self.ready.push_back(channel_no);
                continue;
            }
            job.started = true;
            let more = !finished;

            let seq_no = ch.next_send_seq;
            ch.next_send_seq = ch.next_send_seq.wrapping_add(chunk.len() as u32);

            let frame = Frame::data(
                job.frame_type,
                channel_no,
                job.msg_no,
                more,
                seq_no,
                chunk,
                job.ans_no,
            );

            if finished {
                queue.pop_front();
            }
            if !queue.is_empty() {
                self.ready.push_back(channel_no);
            }
            return Ok(Some(frame));
        }
        Ok(None)
    }

    /// Called after a SEQ update widens a channel's send window, so a
    /// previously window-blocked channel gets a chance to run again.
    pub fn wake_channel(&mut self, channel: u32) {
        if self.pending_for(channel) > 0 && !self.ready.contains(&channel) {
            self.ready.push_back(channel);
        }
    }
}
