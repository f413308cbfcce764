//! Re-exports of the bundled transport backends, gated by the same feature
//! flags as `beep-core`.

#[cfg(feature = "mem")]
pub use beep_core::transport::mem::MemTransport;
#[cfg(feature = "stream")]
pub use beep_core::transport::stream::StreamTransport;

pub use beep_core::transport::{Transport, TransportError};
