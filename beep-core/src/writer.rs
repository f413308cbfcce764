//! The writer path: drains the reply scheduler and outbound sequencer onto
//! the transport. A single task owns this per connection; every other path
//! that needs to put bytes on the wire (channel-zero requests, SEQ updates)
//! queues through the same structures rather than writing directly, so
//! frame ordering on the wire matches submission order.

use std::sync::Arc;
use std::time::Duration;

use crate::error::BeepError;
use crate::reply::ReplyPayload;
use crate::session::ConnectionInner;
use crate::wire::{Frame, FrameType};

const IDLE_POLL: Duration = Duration::from_millis(5);

/// Drive the writer loop until the transport closes.
pub async fn run(conn: Arc<ConnectionInner>) -> BeepError {
    loop {
        for seq_frame in pending_seq_updates(&conn) {
            if let Err(e) = conn.transport().send_frame(seq_frame).await {
                return BeepError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e.to_string(),
                ));
            }
        }
        if let Some(frame) = next_outbound_frame(&conn) {
            if let Err(e) = conn.transport().send_frame(frame).await {
                return BeepError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e.to_string(),
                ));
            }
            continue;
        }
        tokio::time::sleep(IDLE_POLL).await;
    }
}

/// SEQ frames carry our receive-window advertisement, not send-window
/// payload, so they bypass the sequencer's fragmentation/fairness queue
/// entirely: emitted as soon as we've consumed half the advertised window,
/// per the RFC 3081 guidance to update "well before" the window is
/// exhausted.
fn pending_seq_updates(conn: &Arc<ConnectionInner>) -> Vec<Frame> {
    let mut channels = conn.channels.lock();
    let mut updates = Vec::new();
    for (&channel_no, ch) in channels.iter_mut() {
        let threshold = ch.recv_window.size / 2;
        if ch.unacked_recv_bytes as u32 >= threshold.max(1) {
            updates.push(Frame::seq(channel_no, ch.next_recv_seq, ch.recv_window.size));
            ch.unacked_recv_bytes = 0;
            ch.recv_window = crate::window::Window::new(ch.next_recv_seq, ch.recv_window.size);
        }
    }
    updates
}

fn next_outbound_frame(conn: &Arc<ConnectionInner>) -> Option<Frame> {
    if let Some(frame) = drain_ready_replies(conn) {
        return Some(frame);
    }
    conn.sequencer
        .lock()
        .next_frame(&mut conn.channels.lock(), conn.config.max_frame_size)
        .ok()
        .flatten()
}

/// Move every reply that's now in order from the per-channel schedulers
/// into the sequencer's outbound queues, then return one frame if that
/// produced anything immediately ready (replies with an already-materialized
/// `Bytes` payload complete in one queue-then-dequeue pass).
fn drain_ready_replies(conn: &Arc<ConnectionInner>) -> Option<Frame> {
    let mut scheds = conn.reply_schedulers.lock();
    let mut produced = false;
    for (&channel, sched) in scheds.iter_mut() {
        for ready in sched.drain_ready() {
            enqueue_reply(conn, channel, ready.msg_no, ready.payload);
            produced = true;
        }
    }
    drop(scheds);
    if !produced {
        return None;
    }
    conn.sequencer
        .lock()
        .next_frame(&mut conn.channels.lock(), conn.config.max_frame_size)
        .ok()
        .flatten()
}

fn enqueue_reply(conn: &Arc<ConnectionInner>, channel: u32, msg_no: u32, payload: ReplyPayload) {
    // Replies bypass the sequencer's per-channel depth cap: that cap exists
    // to bound how far outbound MSGs can run ahead of the peer, not to
    // truncate a reply the application already committed to sending (an
    // ANS/NUL stream can legitimately run to thousands of frames for one
    // MSG). See `Sequencer::enqueue_reply`.
    let mut sequencer = conn.sequencer.lock();
    match payload {
        ReplyPayload::Rpy(source) => {
            sequencer.enqueue_reply(crate::sequencer::OutboundJob::new(
                channel,
                msg_no,
                FrameType::Rpy,
                None,
                source,
            ));
        }
        ReplyPayload::Err(source) => {
            sequencer.enqueue_reply(crate::sequencer::OutboundJob::new(
                channel,
                msg_no,
                FrameType::Err,
                None,
                source,
            ));
        }
        ReplyPayload::AnsThenNul(frames) => {
            for (ans_no, source) in frames {
                sequencer.enqueue_reply(crate::sequencer::OutboundJob::new(
                    channel,
                    msg_no,
                    FrameType::Ans,
                    Some(ans_no),
                    source,
                ));
            }
            sequencer.enqueue_reply(crate::sequencer::OutboundJob::empty(channel, msg_no, FrameType::Nul, None));
        }
    }
}
