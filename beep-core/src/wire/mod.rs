//! Wire format: frame types, header codec, inbound frame buffer.

pub mod buffer;
pub mod codec;
pub mod frame;

pub use buffer::FrameBuffer;
pub use codec::{Codec, CodecError, Parsed};
pub use frame::{Frame, FrameIdentity, FrameType, DEFAULT_WINDOW_SIZE, MAX_U31, TRAILER};
