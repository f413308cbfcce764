//! Core BEEP (RFC 3080/3081) protocol engine: wire framing, channel
//! multiplexing, sliding-window flow control, fragmentation, reply
//! ordering, and the session state machine.
//!
//! This crate has no opinion on security profiles (TLS, SASL) or any
//! profile above channel zero; those are built on top using the hooks in
//! [`session`] and [`registry`].

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod feeder;
pub mod greeting;
pub mod reader;
pub mod reassembly;
pub mod registry;
pub mod reply;
pub mod sequencer;
pub mod session;
pub mod transport;
pub mod window;
pub mod wire;
pub mod writer;

pub use channel::{Channel, ChannelState, CloseSubState};
pub use config::{PeerConfig, PeerConfigBuilder};
pub use error::{BeepError, OperationError, ProtocolError, ReplyCode};
pub use events::{Event, EventMask, EventQueue, EventSink};
pub use registry::ProfileRegistry;
pub use session::{ConnectionInner, Role};
pub use transport::Transport;
pub use wire::{Frame, FrameType};
