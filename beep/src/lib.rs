//! Ergonomic peer API for BEEP (RFC 3080/3081): channels, profiles, and
//! flow control, built on the wire/session primitives in [`beep_core`].
//!
//! This crate owns nothing [`beep_core`] doesn't already define; it adds
//! the request/reply correlation and task lifecycle an application actually
//! wants, plus convenience constructors for the bundled transports.

mod peer;

#[cfg(feature = "stream")]
pub mod server;

pub mod transport;

pub use peer::{Peer, Reply, DEFAULT_REQUEST_TIMEOUT};

pub use beep_core::channel::{Channel, ChannelState, CloseSubState};
pub use beep_core::config::{PeerConfig, PeerConfigBuilder};
pub use beep_core::error::{BeepError, OperationError, ProtocolError, ReplyCode};
pub use beep_core::events::{Event, EventMask, EventQueue, EventSink};
pub use beep_core::greeting::{ManagementMessage, ProfileOffer};
pub use beep_core::registry::{
    CloseHandler, FrameHandler, MessageContext, ProfileEntry, ProfileRegistry, StartDecision, StartHandler,
};
pub use beep_core::session::{ConnectionInner, Extensions, Role};
pub use beep_core::wire::{Frame, FrameType};

/// Re-exports most applications need for a single `use beep::prelude::*;`.
pub mod prelude {
    pub use crate::transport;
    pub use crate::{
        BeepError, Channel, ChannelState, Event, EventMask, OperationError, Peer, PeerConfig, ProfileRegistry,
        ProtocolError, ReplyCode, Reply, Role, StartDecision,
    };
}
