//! Error taxonomy: protocol-fatal, operation, transient, internal.
//!
//! No `anyhow`/`thiserror` here — every variant gets a manual `Display` and
//! `std::error::Error` impl, matching the rest of this crate.

use std::fmt;

/// RFC 3080 channel-zero reply codes.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyCode {
    /// 200: success.
    Ok = 200,
    /// 421: service temporarily unavailable.
    ServiceUnavailable = 421,
    /// 500: general syntax error.
    SyntaxError = 500,
    /// 530: authentication required.
    AuthRequired = 530,
    /// 534: mechanism too weak.
    MechanismTooWeak = 534,
    /// 535: authentication failure.
    AuthFailure = 535,
    /// 537: action not authorized.
    NotAuthorized = 537,
    /// 538: authentication mechanism requires encryption.
    EncryptionRequired = 538,
    /// 550: still working / general refusal.
    StillWorking = 550,
    /// 553: parameter invalid.
    ParameterInvalid = 553,
    /// 554: transaction failed (e.g. unknown profile or serverName).
    TransactionFailed = 554,
}

impl ReplyCode {
    /// Convert from the wire u16 value.
    pub fn from_u16(val: u16) -> Option<Self> {
        Some(match val {
            200 => ReplyCode::Ok,
            421 => ReplyCode::ServiceUnavailable,
            500 => ReplyCode::SyntaxError,
            530 => ReplyCode::AuthRequired,
            534 => ReplyCode::MechanismTooWeak,
            535 => ReplyCode::AuthFailure,
            537 => ReplyCode::NotAuthorized,
            538 => ReplyCode::EncryptionRequired,
            550 => ReplyCode::StillWorking,
            553 => ReplyCode::ParameterInvalid,
            554 => ReplyCode::TransactionFailed,
            _ => return None,
        })
    }

    /// Convert to the wire u16 value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for ReplyCode {
    type Error = UnknownReplyCode;

    fn try_from(val: u16) -> Result<Self, Self::Error> {
        ReplyCode::from_u16(val).ok_or(UnknownReplyCode(val))
    }
}

impl From<ReplyCode> for u16 {
    fn from(code: ReplyCode) -> u16 {
        code.as_u16()
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Error raised when a reply code does not match any RFC 3080 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownReplyCode(pub u16);

impl fmt::Display for UnknownReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reply code: {}", self.0)
    }
}

impl std::error::Error for UnknownReplyCode {}

/// Reasons a connection was torn down as protocol-fatal.
///
/// Every variant here closes the connection immediately and fires
/// `on_close` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header did not match the wire grammar.
    BadHeader(String),
    /// Trailer was not exactly `END\r\n` at the expected offset.
    BadTrailer,
    /// A partial frame exceeded the configured maximum size.
    FrameTooLarge { limit: usize, got: usize },
    /// `seq_no` did not match the channel's running octet count.
    SequenceMismatch { channel: u32, expected: u32, got: u32 },
    /// Bytes were emitted past the peer's advertised window.
    WindowUnderflow { channel: u32 },
    /// A MSG number was reused before its reply arrived.
    MsgNumberReused { channel: u32, msg_no: u32 },
    /// `more_flag` continuation referenced a different logical message.
    FragmentMismatch { channel: u32 },
    /// A reply mixed ANS and RPY for the same MSG, or sent more than one RPY/ERR.
    BadReplySequence { channel: u32, msg_no: u32 },
    /// A non-SEQ frame referenced a channel that does not exist or is closed.
    UnknownChannel { channel: u32 },
    /// Channel-zero XML did not match the greeting/start/close grammar.
    BadGreeting(String),
    /// A second greeting arrived on an already-greeted session.
    DuplicateGreeting,
    /// A channel number's parity did not match the initiator/listener convention.
    BadChannelParity { channel: u32 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadHeader(reason) => write!(f, "bad frame header: {reason}"),
            ProtocolError::BadTrailer => write!(f, "bad frame trailer"),
            ProtocolError::FrameTooLarge { limit, got } => {
                write!(f, "partial frame exceeded {limit} bytes (got {got})")
            }
            ProtocolError::SequenceMismatch { channel, expected, got } => write!(
                f,
                "channel {channel}: seq_no mismatch, expected {expected}, got {got}"
            ),
            ProtocolError::WindowUnderflow { channel } => {
                write!(f, "channel {channel}: emitted bytes past remote window")
            }
            ProtocolError::MsgNumberReused { channel, msg_no } => write!(
                f,
                "channel {channel}: reused MSG number {msg_no} not yet replied"
            ),
            ProtocolError::FragmentMismatch { channel } => {
                write!(f, "channel {channel}: more_flag continuation mismatch")
            }
            ProtocolError::BadReplySequence { channel, msg_no } => write!(
                f,
                "channel {channel}: bad reply sequence for MSG {msg_no}"
            ),
            ProtocolError::UnknownChannel { channel } => {
                write!(f, "frame referenced unknown or closed channel {channel}")
            }
            ProtocolError::BadGreeting(reason) => write!(f, "bad channel-zero XML: {reason}"),
            ProtocolError::DuplicateGreeting => {
                write!(f, "received a second greeting on an already-greeted session")
            }
            ProtocolError::BadChannelParity { channel } => {
                write!(f, "channel {channel} has the wrong number parity")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Operation-level errors: the connection stays up, the caller sees the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The peer refused the channel start or close with an RFC reply code.
    Refused { code: ReplyCode, diagnostic: String },
    /// No profile in the offered list is supported by the peer.
    ProfileNotSupported,
    /// The channel was closed locally or remotely before the operation completed.
    ChannelClosed,
    /// A synchronous start/close call exceeded its configured timeout.
    Timeout,
    /// The connection was closed before the operation completed.
    ConnectionClosed,
    /// The outstanding-MSG limit for the channel was reached.
    OutstandingLimitReached,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationError::Refused { code, diagnostic } => {
                write!(f, "refused ({code}): {diagnostic}")
            }
            OperationError::ProfileNotSupported => write!(f, "no offered profile is supported"),
            OperationError::ChannelClosed => write!(f, "channel is closed"),
            OperationError::Timeout => write!(f, "operation timed out"),
            OperationError::ConnectionClosed => write!(f, "connection is closed"),
            OperationError::OutstandingLimitReached => {
                write!(f, "outstanding MSG limit reached for this channel")
            }
        }
    }
}

impl std::error::Error for OperationError {}

/// Top-level error type surfaced by the public API.
#[derive(Debug)]
pub enum BeepError {
    /// Protocol-fatal: the connection has been (or is being) closed.
    Protocol(ProtocolError),
    /// Operation error: connection stays up.
    Operation(OperationError),
    /// Transport I/O failure. Treated as protocol-fatal (EOF included).
    Io(std::io::Error),
}

impl fmt::Display for BeepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeepError::Protocol(e) => write!(f, "protocol error: {e}"),
            BeepError::Operation(e) => write!(f, "operation error: {e}"),
            BeepError::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for BeepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BeepError::Protocol(e) => Some(e),
            BeepError::Operation(e) => Some(e),
            BeepError::Io(e) => Some(e),
        }
    }
}

impl From<ProtocolError> for BeepError {
    fn from(e: ProtocolError) -> Self {
        BeepError::Protocol(e)
    }
}

impl From<OperationError> for BeepError {
    fn from(e: OperationError) -> Self {
        BeepError::Operation(e)
    }
}

impl From<std::io::Error> for BeepError {
    fn from(e: std::io::Error) -> Self {
        BeepError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_code_roundtrip() {
        let codes = [
            ReplyCode::Ok,
            ReplyCode::ServiceUnavailable,
            ReplyCode::SyntaxError,
            ReplyCode::AuthRequired,
            ReplyCode::MechanismTooWeak,
            ReplyCode::AuthFailure,
            ReplyCode::NotAuthorized,
            ReplyCode::EncryptionRequired,
            ReplyCode::StillWorking,
            ReplyCode::ParameterInvalid,
            ReplyCode::TransactionFailed,
        ];
        for code in codes {
            let val = code.as_u16();
            assert_eq!(ReplyCode::from_u16(val), Some(code));
        }
        assert_eq!(ReplyCode::from_u16(999), None);
        assert_eq!(ReplyCode::try_from(999), Err(UnknownReplyCode(999)));
    }

    #[test]
    fn reply_code_values_match_rfc() {
        assert_eq!(ReplyCode::Ok as u16, 200);
        assert_eq!(ReplyCode::ServiceUnavailable as u16, 421);
        assert_eq!(ReplyCode::SyntaxError as u16, 500);
        assert_eq!(ReplyCode::StillWorking as u16, 550);
        assert_eq!(ReplyCode::TransactionFailed as u16, 554);
    }

    #[test]
    fn error_display_includes_context() {
        let e = ProtocolError::MsgNumberReused { channel: 3, msg_no: 7 };
        let s = format!("{e}");
        assert!(s.contains('3'));
        assert!(s.contains('7'));

        let e = OperationError::Refused {
            code: ReplyCode::TransactionFailed,
            diagnostic: "unknown profile".into(),
        };
        let s = format!("{e}");
        assert!(s.contains("554"));
        assert!(s.contains("unknown profile"));
    }

    #[test]
    fn beep_error_sources_chain() {
        use std::error::Error;
        let e: BeepError = ProtocolError::BadTrailer.into();
        assert!(e.source().is_some());
    }
}
