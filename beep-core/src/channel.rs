//! Per-channel state: lifecycle, MSG-number allocation, outstanding-MSG
//! bookkeeping, and the close-in-transit race.

use std::collections::BTreeMap;

use crate::error::ProtocolError;
use crate::window::Window;

/// Channel lifecycle. Channel zero starts `Ready` (it needs no `<start>`
/// exchange); every other channel begins `Opening` while its `<start>`/`<ok>`
/// round trip is outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Ready,
    Closing,
    Closed,
}

/// Sub-state while a `<close>` exchange is outstanding, tracking which side(s)
/// have a close request in flight. Needed to resolve the race where both
/// peers request a close of the same channel at once: whichever side sees a
/// local close request land after the remote one already arrived answers the
/// remote request with `<ok/>` instead of emitting a second `<close>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseSubState {
    /// No close request outstanding on either side.
    None,
    /// We sent `<close>` and are waiting for `<ok/>` or `<error>`.
    LocalPending,
    /// The peer sent `<close>` and we have not yet answered.
    RemotePending,
    /// Both: we sent `<close>` before the peer's own `<close>` was observed.
    /// Resolved by answering the remote request with `<ok/>` and treating
    /// our own outstanding request as satisfied by the same exchange.
    LocalAndRemotePending,
}

/// One MSG the channel has sent or received that has not yet been fully
/// answered (no RPY/ERR, or ANS stream not yet terminated by NUL).
#[derive(Clone, Debug)]
pub struct OutstandingMsg {
    pub msg_no: u32,
    /// Order this MSG arrived in, relative to other MSGs on the same
    /// channel. Used by the reply scheduler to restore ordering.
    pub arrival_index: u64,
}

/// State for one channel within a connection.
pub struct Channel {
    pub number: u32,
    pub state: ChannelState,
    pub close_sub_state: CloseSubState,
    /// Profile URI this channel was started with (empty for channel zero).
    pub profile: String,

    /// The window the peer has advertised for bytes we may send it:
    /// `send_window.start` is the base octet the peer last acknowledged,
    /// `send_window.size` the number of bytes past that base it will accept.
    /// This slides only on an incoming SEQ frame, never on send.
    pub send_window: Window,
    /// Next seq_no we will use on our next outbound frame (running octet
    /// counter), independent of `send_window`: the window says how far
    /// ahead of the peer's last ack we're allowed to get, this says how far
    /// we actually are.
    pub next_send_seq: u32,
    /// The window we have advertised to the peer for bytes it may send us.
    pub recv_window: Window,
    /// Next seq_no we expect to receive (running octet counter).
    pub next_recv_seq: u32,
    /// Bytes received since the last SEQ frame we emitted, for the
    /// half-window update heuristic.
    pub unacked_recv_bytes: u32,

    /// MSGs sent on this channel awaiting a reply, keyed by msg_no.
    outstanding_sent: BTreeMap<u32, OutstandingMsg>,
    /// MSGs received on this channel awaiting our reply, keyed by msg_no.
    outstanding_received: BTreeMap<u32, OutstandingMsg>,
    next_arrival_index: u64,
    outstanding_limit: usize,
}

impl Channel {
    pub fn new(number: u32, window_size: u32, outstanding_limit: usize) -> Self {
        Channel {
            number,
            state: if number == 0 {
                ChannelState::Ready
            } else {
                ChannelState::Opening
            },
            close_sub_state: CloseSubState::None,
            profile: String::new(),
            // Per RFC 3081 the peer's advertised window starts at the same
            // default as our own until a SEQ frame updates it; without this
            // no channel (including zero) could send its first byte.
            send_window: Window::new(0, window_size),
            next_send_seq: 0,
            recv_window: Window::new(0, window_size),
            next_recv_seq: 0,
            unacked_recv_bytes: 0,
            outstanding_sent: BTreeMap::new(),
            outstanding_received: BTreeMap::new(),
            next_arrival_index: 0,
            outstanding_limit,
        }
    }

    pub fn mark_ready(&mut self, profile: String) {
        self.profile = profile;
        self.state = ChannelState::Ready;
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.state, ChannelState::Ready)
    }

    /// Allocate the next MSG number to send on this channel: the smallest
    /// non-negative integer not currently outstanding, per RFC 3080. Since
    /// `outstanding_sent` is keyed by msg_no and iterated in order, the
    /// smallest free slot is the first gap in that sequence starting at 0 —
    /// a scan bounded by `outstanding_limit`, so cheap in practice. On
    /// wraparound past `u32::MAX` the scan naturally restarts from 0 since
    /// every already-replied number is free again.
    pub fn allocate_msg_no(&mut self) -> Result<u32, ProtocolError> {
        if self.outstanding_sent.len() >= self.outstanding_limit {
            return Err(ProtocolError::MsgNumberReused {
                channel: self.number,
                msg_no: 0,
            });
        }
        let mut candidate = 0u32;
        for &existing in self.outstanding_sent.keys() {
            if existing != candidate {
                break;
            }
            candidate = candidate.wrapping_add(1);
        }
        let arrival_index = self.next_arrival_index;
        self.next_arrival_index += 1;
        self.outstanding_sent.insert(
            candidate,
            OutstandingMsg {
                msg_no: candidate,
                arrival_index,
            },
        );
        Ok(candidate)
    }

    /// Record a MSG received from the peer, returning its arrival index.
    /// Rejects reuse of a MSG number still awaiting our reply.
    pub fn record_received_msg(&mut self, msg_no: u32) -> Result<u64, ProtocolError> {
        if self.outstanding_received.contains_key(&msg_no) {
            return Err(ProtocolError::MsgNumberReused {
                channel: self.number,
                msg_no,
            });
        }
        let arrival_index = self.next_arrival_index;
        self.next_arrival_index += 1;
        self.outstanding_received.insert(
            msg_no,
            OutstandingMsg {
                msg_no,
                arrival_index,
            },
        );
        Ok(arrival_index)
    }

    /// The peer's reply to `msg_no` is now complete (RPY, ERR, or a NUL
    /// terminating an ANS stream): free the slot so the number can be reused.
    pub fn complete_sent_msg(&mut self, msg_no: u32) -> Option<OutstandingMsg> {
        self.outstanding_sent.remove(&msg_no)
    }

    /// Our reply to `msg_no` has been fully submitted to the writer.
    pub fn complete_received_msg(&mut self, msg_no: u32) -> Option<OutstandingMsg> {
        self.outstanding_received.remove(&msg_no)
    }

    pub fn arrival_index_for_received(&self, msg_no: u32) -> Option<u64> {
        self.outstanding_received.get(&msg_no).map(|m| m.arrival_index)
    }

    pub fn outstanding_sent_count(&self) -> usize {
        self.outstanding_sent.len()
    }

    pub fn outstanding_received_count(&self) -> usize {
        self.outstanding_received.len()
    }

    /// Begin closing: no more MSGs may be sent once this returns, but
    /// outstanding replies still drain.
    pub fn begin_close(&mut self, local: bool) {
        self.close_sub_state = match (self.close_sub_state, local) {
            (CloseSubState::None, true) => CloseSubState::LocalPending,
            (CloseSubState::None, false) => CloseSubState::RemotePending,
            (CloseSubState::RemotePending, true) => CloseSubState::LocalAndRemotePending,
            (CloseSubState::LocalPending, false) => CloseSubState::LocalAndRemotePending,
            (other, _) => other,
        };
        self.state = ChannelState::Closing;
    }

    pub fn finish_close(&mut self) {
        self.state = ChannelState::Closed;
        self.close_sub_state = CloseSubState::None;
    }

    /// Whether it is safe to tear down the channel: no MSGs outstanding in
    /// either direction.
    pub fn drained(&self) -> bool {
        self.outstanding_sent.is_empty() && self.outstanding_received.is_empty()
    }
}
