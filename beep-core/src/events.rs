//! Notification delivery: a bitmask of interesting event kinds, delivered
//! either by callback (push) or by polling a bounded queue (pull).

use bitflags::bitflags;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

bitflags! {
    /// Which event kinds a listener wants to hear about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const CHANNEL_STARTED  = 0b0000_0001;
        const CHANNEL_CLOSED   = 0b0000_0010;
        const MESSAGE_RECEIVED = 0b0000_0100;
        const REPLY_RECEIVED   = 0b0000_1000;
        const CONNECTION_UP    = 0b0001_0000;
        const CONNECTION_DOWN  = 0b0010_0000;
        const WINDOW_UPDATED   = 0b0100_0000;
    }
}

/// One notification, tagged with the channel it concerns (0 for
/// connection-wide events).
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventMask,
    pub channel: u32,
    pub detail: String,
}

impl Event {
    pub fn new(kind: EventMask, channel: u32, detail: impl Into<String>) -> Self {
        Event {
            kind,
            channel,
            detail: detail.into(),
        }
    }
}

/// A single bitmask kind, for matching against an `EventMask` filter.
pub fn matches(mask: EventMask, event: &Event) -> bool {
    mask.intersects(event.kind)
}

/// Push-mode callback, invoked inline from the dispatch pool.
pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// How a listener wants events delivered.
pub enum EventSink {
    Push(EventCallback),
    Pull(EventQueue),
}

/// A bounded MPSC-backed queue for pull-mode event consumption.
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        EventQueue { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender { tx: self.tx.clone() }
    }

    /// Wait for the next event, or `None` on timeout.
    pub async fn next_event(&mut self, wait: Duration) -> Option<Event> {
        timeout(wait, self.rx.recv()).await.ok().flatten()
    }

    /// Non-blocking poll.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// A cloneable handle to push events into an `EventQueue`.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub async fn send(&self, event: Event) {
        // An event queue that's full because the application isn't
        // draining it sheds the oldest rather than blocking the reader
        // loop; `try_send` makes that explicit instead of silently
        // deadlocking a slow consumer against the connection.
        let channel = event.channel;
        if self.tx.try_send(event).is_err() {
            tracing::warn!(channel, "event queue full, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_intersects_matching_kind() {
        let mask = EventMask::CHANNEL_STARTED | EventMask::CHANNEL_CLOSED;
        let ev = Event::new(EventMask::CHANNEL_CLOSED, 3, "closed");
        assert!(matches(mask, &ev));
        let ev2 = Event::new(EventMask::MESSAGE_RECEIVED, 3, "msg");
        assert!(!matches(mask, &ev2));
    }

    #[tokio::test]
    async fn pull_queue_round_trips_an_event() {
        let mut queue = EventQueue::new(4);
        let sender = queue.sender();
        sender.send(Event::new(EventMask::CONNECTION_UP, 0, "up")).await;
        let ev = queue.next_event(Duration::from_millis(100)).await;
        assert!(ev.is_some());
        assert_eq!(ev.unwrap().kind, EventMask::CONNECTION_UP);
    }

    #[tokio::test]
    async fn next_event_times_out_when_empty() {
        let mut queue = EventQueue::new(4);
        let ev = queue.next_event(Duration::from_millis(10)).await;
        assert!(ev.is_none());
    }
}
