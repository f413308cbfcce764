//! The reader loop: one task per connection, pulling frames off the
//! transport and routing them into channel state, reassembly, and the
//! reply-ordering path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BeepError, ProtocolError};
use crate::events::EventMask;
use crate::greeting::{self, ManagementMessage};
use crate::reassembly::{Delivered, PartialMessage};
use crate::session::{render, ConnectionInner};
use crate::wire::{Frame, FrameIdentity, FrameType};
use crate::window::Window;

/// What the reader loop asks the rest of the connection to do in response
/// to one delivered (fully reassembled) message.
pub enum Delivery {
    /// A MSG for an application-registered profile; hand to the dispatch
    /// pool for the profile's frame handler.
    InboundMessage(Delivered),
    /// A reply (RPY/ERR, or the NUL closing an ANS stream) to a MSG we sent.
    InboundReply(Delivered),
}

/// Drive the reader loop until the transport closes or a protocol error
/// occurs. Returns the error that ended the loop (an `Ok(())` return never
/// happens in practice: a graceful close is also reported as an error here
/// so the caller can distinguish "we closed" from "peer misbehaved").
pub async fn run(
    conn: Arc<ConnectionInner>,
    mut on_delivery: impl FnMut(Delivery) + Send,
) -> BeepError {
    let mut partials: HashMap<FrameIdentity, PartialMessage> = HashMap::new();

    loop {
        let frame = match conn.transport().recv_frame().await {
            Ok(frame) => frame,
            Err(crate::transport::TransportError::Protocol(e)) => {
                conn.transport().close();
                return BeepError::Protocol(e);
            }
            Err(crate::transport::TransportError::Closed) => {
                return BeepError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "transport closed"));
            }
        };

        if let Err(e) = handle_frame(&conn, frame, &mut partials, &mut on_delivery) {
            conn.transport().close();
            return BeepError::Protocol(e);
        }
    }
}

fn handle_frame(
    conn: &Arc<ConnectionInner>,
    frame: Frame,
    partials: &mut HashMap<FrameIdentity, PartialMessage>,
    on_delivery: &mut impl FnMut(Delivery),
) -> Result<(), ProtocolError> {
    if frame.frame_type == FrameType::Seq {
        return handle_seq(conn, frame);
    }

    let channel_no = frame.channel;
    {
        let channels = conn.channels.lock();
        if !channels.contains_key(&channel_no) {
            return Err(ProtocolError::UnknownChannel { channel: channel_no });
        }
    }

    check_and_advance_recv_seq(conn, &frame)?;

    let identity = frame.identity();
    let entry = partials.entry(identity).or_insert_with(|| PartialMessage::new(identity));
    entry.append(&frame.payload);
    if frame.more {
        return Ok(());
    }
    let partial = partials.remove(&identity).expect("just inserted");
    let payload = partial.finish();

    let delivered = Delivered::new(identity.channel, identity.msg_no, identity.frame_type, frame.ans_no, payload);

    if identity.frame_type == FrameType::Msg {
        handle_msg(conn, delivered, on_delivery)
    } else {
        handle_reply_frame(conn, delivered, on_delivery)
    }
}

fn check_and_advance_recv_seq(conn: &Arc<ConnectionInner>, frame: &Frame) -> Result<(), ProtocolError> {
    let mut channels = conn.channels.lock();
    let ch = channels.get_mut(&frame.channel).expect("checked above");
    if frame.seq_no != ch.next_recv_seq {
        return Err(ProtocolError::SequenceMismatch {
            channel: frame.channel,
            expected: ch.next_recv_seq,
            got: frame.seq_no,
        });
    }
    ch.next_recv_seq = ch.next_recv_seq.wrapping_add(frame.payload_size());
    ch.unacked_recv_bytes += frame.payload_size();
    Ok(())
}

fn handle_seq(conn: &Arc<ConnectionInner>, frame: Frame) -> Result<(), ProtocolError> {
    let (ack_no, window) = frame.seq_ack.expect("SEQ frame always carries seq_ack");
    {
        let mut channels = conn.channels.lock();
        let Some(ch) = channels.get_mut(&frame.channel) else {
            return Err(ProtocolError::UnknownChannel { channel: frame.channel });
        };
        ch.send_window = Window::new(ack_no, window);
    }
    conn.sequencer.lock().wake_channel(frame.channel);
    Ok(())
}

fn handle_msg(
    conn: &Arc<ConnectionInner>,
    delivered: Delivered,
    on_delivery: &mut impl FnMut(Delivery),
) -> Result<(), ProtocolError> {
    if delivered.channel == 0 {
        return handle_management_msg(conn, delivered);
    }

    let (arrival_index, profile) = {
        let mut channels = conn.channels.lock();
        let ch = channels.get_mut(&delivered.channel).expect("checked above");
        let arrival_index = ch.record_received_msg(delivered.msg_no)?;
        (arrival_index, ch.profile.clone())
    };
    conn.emit(EventMask::MESSAGE_RECEIVED, delivered.channel, format!("msg {}", delivered.msg_no));

    if let Some(entry) = conn.registry.get(&profile) {
        let frame_handler = entry.frame_handler.clone();
        let ctx = crate::registry::MessageContext::new(conn.clone(), delivered.channel, delivered.msg_no, arrival_index);
        let payload = delivered.payload.clone();
        if conn.dispatch.submit(Box::new(move || frame_handler(ctx, &payload))).is_err() {
            tracing::warn!(channel = delivered.channel, "dispatch pool full, dropping frame handler invocation");
        }
    }

    on_delivery(Delivery::InboundMessage(delivered));
    Ok(())
}

fn handle_reply_frame(
    conn: &Arc<ConnectionInner>,
    delivered: Delivered,
    on_delivery: &mut impl FnMut(Delivery),
) -> Result<(), ProtocolError> {
    if delivered.channel == 0 {
        return handle_management_reply(conn, delivered);
    }

    let is_terminal = delivered.frame_type != FrameType::Ans;
    if is_terminal {
        let mut channels = conn.channels.lock();
        let ch = channels.get_mut(&delivered.channel).expect("checked above");
        if ch.complete_sent_msg(delivered.msg_no).is_none() {
            return Err(ProtocolError::BadReplySequence {
                channel: delivered.channel,
                msg_no: delivered.msg_no,
            });
        }
    }
    conn.emit(EventMask::REPLY_RECEIVED, delivered.channel, format!("msg {}", delivered.msg_no));
    on_delivery(Delivery::InboundReply(delivered));
    Ok(())
}

fn handle_management_msg(conn: &Arc<ConnectionInner>, delivered: Delivered) -> Result<(), ProtocolError> {
    let text = std::str::from_utf8(&delivered.payload)
        .map_err(|_| ProtocolError::BadGreeting("channel-zero payload was not valid UTF-8".into()))?;
    let msg = greeting::parse(text)?;

    let response = match msg {
        ManagementMessage::Greeting { .. } => {
            conn.on_greeting_received(&msg)?;
            return Ok(());
        }
        ManagementMessage::Start { channel, profiles } => {
            let resp = conn.handle_start_request(channel, &profiles);
            if matches!(resp, ManagementMessage::Ok) {
                conn.emit(EventMask::CHANNEL_STARTED, channel, "started");
            }
            resp
        }
        ManagementMessage::Close { channel, .. } => {
            let resp = conn.handle_close_request(channel);
            if matches!(resp, ManagementMessage::Ok) {
                conn.emit(EventMask::CHANNEL_CLOSED, channel, "closed");
            }
            resp
        }
        ManagementMessage::Ok | ManagementMessage::Error { .. } => {
            return Err(ProtocolError::BadGreeting("unexpected reply sent as a MSG".into()));
        }
    };

    let payload = render(&response);
    let arrival_index = {
        let mut channels = conn.channels.lock();
        let ch = channels.get_mut(&0).expect("channel zero always exists");
        ch.record_received_msg(delivered.msg_no).unwrap_or(0)
    };
    let mut scheds = conn.reply_schedulers.lock();
    let sched = scheds.entry(0).or_default();
    let kind = match &response {
        ManagementMessage::Error { code, diagnostic } => crate::reply::ReplyPayload::Err(
            crate::sequencer::PayloadSource::Bytes(bytes::Bytes::from(format!("{code} {diagnostic}"))),
        ),
        _ => crate::reply::ReplyPayload::Rpy(crate::sequencer::PayloadSource::Bytes(payload)),
    };
    let _ = sched.submit(delivered.msg_no, arrival_index, kind);
    Ok(())
}

fn handle_management_reply(conn: &Arc<ConnectionInner>, delivered: Delivered) -> Result<(), ProtocolError> {
    let text = std::str::from_utf8(&delivered.payload)
        .map_err(|_| ProtocolError::BadGreeting("channel-zero payload was not valid UTF-8".into()))?;
    let msg = greeting::parse(text)?;
    match msg {
        ManagementMessage::Ok => {
            {
                let mut channels = conn.channels.lock();
                if let Some(ch) = channels.get_mut(&0) {
                    ch.complete_sent_msg(delivered.msg_no);
                }
            }
            conn.apply_pending_zero_ok(delivered.msg_no);
            Ok(())
        }
        ManagementMessage::Error { code, diagnostic } => {
            let mut channels = conn.channels.lock();
            if let Some(ch) = channels.get_mut(&0) {
                ch.complete_sent_msg(delivered.msg_no);
            }
            tracing::debug!(code, %diagnostic, "peer refused channel-zero request");
            Ok(())
        }
        _ => Err(ProtocolError::BadGreeting("unexpected management message as a reply".into())),
    }
}

