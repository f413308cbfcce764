//! The `Frame` type: a typed unit on the wire.

use bytes::Bytes;
use std::fmt;

/// Trailer literal that terminates every non-SEQ frame.
pub const TRAILER: &[u8] = b"END\r\n";

/// Default local receive window, in octets, per channel.
pub const DEFAULT_WINDOW_SIZE: u32 = 4096;

/// The largest legal value for a `u31` wire field (channel number, MSG
/// number, payload size).
pub const MAX_U31: u32 = (1u32 << 31) - 1;

/// Frame type, one of the six BEEP frame kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Msg,
    Rpy,
    Ans,
    Nul,
    Err,
    Seq,
}

impl FrameType {
    /// The header token for this frame type (`"MSG"`, `"RPY"`, ...).
    pub fn token(self) -> &'static str {
        match self {
            FrameType::Msg => "MSG",
            FrameType::Rpy => "RPY",
            FrameType::Ans => "ANS",
            FrameType::Nul => "NUL",
            FrameType::Err => "ERR",
            FrameType::Seq => "SEQ",
        }
    }

    /// Parse a header token into a frame type. Case-sensitive: BEEP tokens
    /// are always uppercase ASCII.
    pub fn from_token(token: &[u8]) -> Option<Self> {
        Some(match token {
            b"MSG" => FrameType::Msg,
            b"RPY" => FrameType::Rpy,
            b"ANS" => FrameType::Ans,
            b"NUL" => FrameType::Nul,
            b"ERR" => FrameType::Err,
            b"SEQ" => FrameType::Seq,
            _ => return None,
        })
    }

    /// Whether this frame type carries a payload and `END\r\n` trailer.
    pub fn is_data(self) -> bool {
        !matches!(self, FrameType::Seq)
    }

    /// Whether this frame type is one of the reply kinds (RPY, ANS, NUL, ERR).
    pub fn is_reply(self) -> bool {
        matches!(self, FrameType::Rpy | FrameType::Ans | FrameType::Nul | FrameType::Err)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Identity of a logical multi-frame message: the unit `more_flag`
/// continuations must agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameIdentity {
    pub channel: u32,
    pub msg_no: u32,
    pub frame_type: FrameType,
    /// Only meaningful for ANS; `0` otherwise.
    pub ans_no: u32,
}

/// A single parsed frame, data or SEQ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub channel: u32,
    pub msg_no: u32,
    pub more: bool,
    pub seq_no: u32,
    pub payload: Bytes,
    /// Only populated for ANS frames.
    pub ans_no: Option<u32>,
    /// Only populated for SEQ frames: `(ack_no, window)`.
    pub seq_ack: Option<(u32, u32)>,
}

impl Frame {
    /// Build a data frame (MSG/RPY/ANS/NUL/ERR).
    pub fn data(
        frame_type: FrameType,
        channel: u32,
        msg_no: u32,
        more: bool,
        seq_no: u32,
        payload: Bytes,
        ans_no: Option<u32>,
    ) -> Self {
        debug_assert!(frame_type.is_data());
        Frame {
            frame_type,
            channel,
            msg_no,
            more,
            seq_no,
            payload,
            ans_no,
            seq_ack: None,
        }
    }

    /// Build a SEQ frame.
    pub fn seq(channel: u32, ack_no: u32, window: u32) -> Self {
        Frame {
            frame_type: FrameType::Seq,
            channel,
            msg_no: 0,
            more: false,
            seq_no: 0,
            payload: Bytes::new(),
            ans_no: None,
            seq_ack: Some((ack_no, window)),
        }
    }

    /// The identity tuple that continuation frames must share.
    pub fn identity(&self) -> FrameIdentity {
        FrameIdentity {
            channel: self.channel,
            msg_no: self.msg_no,
            frame_type: self.frame_type,
            ans_no: self.ans_no.unwrap_or(0),
        }
    }

    pub fn payload_size(&self) -> u32 {
        self.payload.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_roundtrip() {
        for t in [
            FrameType::Msg,
            FrameType::Rpy,
            FrameType::Ans,
            FrameType::Nul,
            FrameType::Err,
            FrameType::Seq,
        ] {
            assert_eq!(FrameType::from_token(t.token().as_bytes()), Some(t));
        }
        assert_eq!(FrameType::from_token(b"XYZ"), None);
    }

    #[test]
    fn is_data_excludes_seq() {
        assert!(FrameType::Msg.is_data());
        assert!(!FrameType::Seq.is_data());
    }

    #[test]
    fn is_reply_matches_reply_kinds() {
        assert!(!FrameType::Msg.is_reply());
        assert!(FrameType::Rpy.is_reply());
        assert!(FrameType::Ans.is_reply());
        assert!(FrameType::Nul.is_reply());
        assert!(FrameType::Err.is_reply());
    }

    #[test]
    fn identity_carries_ans_no() {
        let f = Frame::data(FrameType::Ans, 1, 2, true, 0, Bytes::new(), Some(9));
        assert_eq!(f.identity().ans_no, 9);
        let f2 = Frame::data(FrameType::Rpy, 1, 2, true, 0, Bytes::new(), None);
        assert_eq!(f2.identity().ans_no, 0);
    }
}
