//! Per-channel reply ordering.
//!
//! Replies produced by the application out of MSG-arrival order are queued
//! here; the writer only ever emits the reply whose `arrival_index` matches
//! the next expected one, then advances.

use std::collections::BTreeMap;

use crate::sequencer::PayloadSource;

/// The shape a reply to one MSG takes: exactly one RPY, one ERR, or a
/// sequence of ANS frames terminated by NUL (never mixed).
pub enum ReplyPayload {
    Rpy(PayloadSource),
    Err(PayloadSource),
    /// Each entry is one ANS frame's `(ans_no, payload)`; a NUL is emitted
    /// automatically once all have been sent. An empty vec is legal (zero
    /// ANS frames, straight to NUL).
    AnsThenNul(Vec<(u32, PayloadSource)>),
}

impl ReplyPayload {
    fn describe(&self) -> &'static str {
        match self {
            ReplyPayload::Rpy(_) => "RPY",
            ReplyPayload::Err(_) => "ERR",
            ReplyPayload::AnsThenNul(_) => "ANS/NUL",
        }
    }
}

/// A queued reply awaiting its turn to be written.
pub struct QueuedReply {
    pub msg_no: u32,
    pub payload: ReplyPayload,
}

/// Error raised when the application tries to reply twice to the same MSG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateReply {
    pub msg_no: u32,
}

impl std::fmt::Display for DuplicateReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MSG {} already has a reply submitted", self.msg_no)
    }
}

impl std::error::Error for DuplicateReply {}

/// Orders replies for one channel by the arrival order of their MSGs.
#[derive(Default)]
pub struct ReplyScheduler {
    next_arrival_index: u64,
    pending: BTreeMap<u64, QueuedReply>,
    in_flight: std::collections::HashSet<u32>,
}

impl ReplyScheduler {
    pub fn new() -> Self {
        ReplyScheduler {
            next_arrival_index: 0,
            pending: BTreeMap::new(),
            in_flight: std::collections::HashSet::new(),
        }
    }

    /// Submit a reply for the MSG that arrived at `arrival_index`.
    pub fn submit(
        &mut self,
        msg_no: u32,
        arrival_index: u64,
        payload: ReplyPayload,
    ) -> Result<(), DuplicateReply> {
        if !self.in_flight.insert(msg_no) {
            return Err(DuplicateReply { msg_no });
        }
        tracing::debug!(
            msg_no,
            arrival_index,
            kind = payload.describe(),
            "reply submitted"
        );
        self.pending.insert(arrival_index, QueuedReply { msg_no, payload });
        Ok(())
    }

    /// Drain every reply that is now ready to be written, in order.
    pub fn drain_ready(&mut self) -> Vec<QueuedReply> {
        let mut ready = Vec::new();
        while let Some(entry) = self.pending.remove(&self.next_arrival_index) {
            self.in_flight.remove(&entry.msg_no);
            self.next_arrival_index += 1;
            ready.push(entry);
        }
        ready
    }

    /// Number of replies queued but not yet ready to write.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn next_arrival_index(&self) -> u64 {
        self.next_arrival_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn rpy(data: &'static str) -> ReplyPayload {
        ReplyPayload::Rpy(PayloadSource::Bytes(Bytes::from_static(data.as_bytes())))
    }

    #[test]
    fn emits_in_submission_order_when_already_ordered() {
        let mut sched = ReplyScheduler::new();
        sched.submit(0, 0, rpy("a")).unwrap();
        let ready = sched.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].msg_no, 0);

        sched.submit(1, 1, rpy("b")).unwrap();
        let ready = sched.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].msg_no, 1);
    }

    #[test]
    fn reorders_out_of_order_submissions() {
        // Server receives MSG 0, 1, 2; replies arrive in order 1, 0, 2.
        let mut sched = ReplyScheduler::new();
        sched.submit(1, 1, rpy("reply-to-1")).unwrap();
        assert_eq!(sched.drain_ready().len(), 0); // index 0 not ready yet

        sched.submit(0, 0, rpy("reply-to-0")).unwrap();
        let ready = sched.drain_ready();
        // Both 0 and 1 are now ready, emitted in arrival order.
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].msg_no, 0);
        assert_eq!(ready[1].msg_no, 1);

        sched.submit(2, 2, rpy("reply-to-2")).unwrap();
        let ready = sched.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].msg_no, 2);
    }

    #[test]
    fn duplicate_reply_rejected() {
        let mut sched = ReplyScheduler::new();
        sched.submit(5, 0, rpy("x")).unwrap();
        let err = sched.submit(5, 1, rpy("y")).unwrap_err();
        assert_eq!(err, DuplicateReply { msg_no: 5 });
    }

    #[test]
    fn ans_then_nul_group_is_a_single_reply() {
        let mut sched = ReplyScheduler::new();
        let group = ReplyPayload::AnsThenNul(vec![
            (0, PayloadSource::Bytes(Bytes::from_static(b"a"))),
            (1, PayloadSource::Bytes(Bytes::from_static(b"b"))),
        ]);
        sched.submit(0, 0, group).unwrap();
        let ready = sched.drain_ready();
        assert_eq!(ready.len(), 1);
        match &ready[0].payload {
            ReplyPayload::AnsThenNul(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected AnsThenNul"),
        }
    }
}
