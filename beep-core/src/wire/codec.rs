//! Header tokenizer and frame assembler.
//!
//! Parsing is hand-rolled over byte slices rather than built on a
//! parser-combinator crate: the grammar is small, fixed, and adversarial
//! input must be rejected strictly (a permissive parser here is a
//! downgrade-attack surface, not a convenience).

use bytes::Bytes;

use super::frame::{Frame, FrameType, MAX_U31, TRAILER};

/// Result of attempting to parse one frame out of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// A full frame was parsed; `consumed` bytes should be dropped from the
    /// front of the buffer.
    Complete { frame: Frame, consumed: usize },
    /// The buffer does not yet contain a full frame; accumulate at least
    /// `needed` more bytes before retrying (a lower bound, not exact).
    Need(usize),
}

/// Why a header or trailer failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Header tokens, spacing, or terminator didn't match the grammar.
    BadHeader(&'static str),
    /// A numeric field didn't fit its declared range (u31/u32) or wasn't
    /// ASCII digits.
    BadField(&'static str),
    /// `END\r\n` was not found at the expected offset.
    BadTrailer,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::BadHeader(reason) => write!(f, "bad header: {reason}"),
            CodecError::BadField(reason) => write!(f, "bad field: {reason}"),
            CodecError::BadTrailer => write!(f, "bad trailer"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Stateless frame codec: parses and emits frames against caller-owned
/// buffers. Performs no allocation for SEQ frames.
pub struct Codec;

impl Codec {
    /// Attempt to parse one frame from the front of `buf`.
    ///
    /// On `Parsed::Complete`, the caller is responsible for advancing past
    /// `consumed` bytes. Returns `Err` for any malformed header/trailer;
    /// the caller must treat this as connection-fatal.
    pub fn parse_frame(buf: &[u8]) -> Result<Parsed, CodecError> {
        let Some(header_end) = find_crlf(buf) else {
            return Ok(Parsed::Need(buf.len() + 1));
        };
        let header = &buf[..header_end];
        let after_header = header_end + 2;

        let mut fields = header.split(|&b| b == b' ');
        let type_tok = fields.next().ok_or(CodecError::BadHeader("missing type"))?;

        if type_tok == b"SEQ" {
            return parse_seq(fields, buf, after_header);
        }

        let frame_type =
            FrameType::from_token(type_tok).ok_or(CodecError::BadHeader("unknown frame type"))?;
        parse_data_frame(frame_type, fields, buf, after_header)
    }

    /// Serialize a frame onto the end of `out`.
    pub fn encode_frame(frame: &Frame, out: &mut Vec<u8>) {
        if frame.frame_type == FrameType::Seq {
            let (ack_no, window) = frame.seq_ack.unwrap_or((0, 0));
            out.extend_from_slice(b"SEQ ");
            write_u32(out, frame.channel);
            out.push(b' ');
            write_u32(out, ack_no);
            out.push(b' ');
            write_u32(out, window);
            out.extend_from_slice(b"\r\n");
            return;
        }

        out.extend_from_slice(frame.frame_type.token().as_bytes());
        out.push(b' ');
        write_u32(out, frame.channel);
        out.push(b' ');
        write_u32(out, frame.msg_no);
        out.push(b' ');
        out.push(if frame.more { b'*' } else { b'.' });
        out.push(b' ');
        write_u32(out, frame.seq_no);
        out.push(b' ');
        write_u32(out, frame.payload_size());
        if let Some(ans_no) = frame.ans_no {
            out.push(b' ');
            write_u32(out, ans_no);
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&frame.payload);
        out.extend_from_slice(TRAILER);
    }
}

fn parse_seq<'a>(
    mut fields: impl Iterator<Item = &'a [u8]>,
    buf: &[u8],
    after_header: usize,
) -> Result<Parsed, CodecError> {
    let channel = next_u31(&mut fields, "channel")?;
    let ack_no = next_u32(&mut fields, "ack_no")?;
    let window = next_u32(&mut fields, "window")?;
    if fields.next().is_some() {
        return Err(CodecError::BadHeader("unexpected trailing field on SEQ"));
    }
    let _ = buf;
    Ok(Parsed::Complete {
        frame: Frame::seq(channel, ack_no, window),
        consumed: after_header,
    })
}

fn parse_data_frame<'a>(
    frame_type: FrameType,
    mut fields: impl Iterator<Item = &'a [u8]>,
    buf: &[u8],
    after_header: usize,
) -> Result<Parsed, CodecError> {
    let channel = next_u31(&mut fields, "channel")?;
    let msg_no = next_u31(&mut fields, "msg_no")?;
    let more_tok = fields.next().ok_or(CodecError::BadHeader("missing more flag"))?;
    let more = match more_tok {
        b"." => false,
        b"*" => true,
        _ => return Err(CodecError::BadHeader("more flag must be '.' or '*'")),
    };
    let seq_no = next_u32(&mut fields, "seq_no")?;
    let size = next_u31(&mut fields, "size")? as usize;
    let ans_field = fields.next();

    let ans_no = match (frame_type, ans_field) {
        (FrameType::Ans, Some(tok)) => Some(parse_u32_field(tok, "ans_no")?),
        (FrameType::Ans, None) => return Err(CodecError::BadHeader("ANS frame missing ans_no")),
        (_, None) => None,
        (_, Some(_)) => return Err(CodecError::BadHeader("ans_no present on non-ANS frame")),
    };

    if fields.next().is_some() {
        return Err(CodecError::BadHeader("unexpected trailing field"));
    }

    let payload_start = after_header;
    let payload_end = payload_start
        .checked_add(size)
        .ok_or(CodecError::BadField("size overflow"))?;
    let trailer_end = payload_end + TRAILER.len();

    if buf.len() < trailer_end {
        return Ok(Parsed::Need(trailer_end - buf.len()));
    }

    if &buf[payload_end..trailer_end] != TRAILER {
        return Err(CodecError::BadTrailer);
    }

    let payload = Bytes::copy_from_slice(&buf[payload_start..payload_end]);
    let frame = Frame::data(frame_type, channel, msg_no, more, seq_no, payload, ans_no);

    Ok(Parsed::Complete {
        frame,
        consumed: trailer_end,
    })
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn next_u31<'a>(
    fields: &mut impl Iterator<Item = &'a [u8]>,
    name: &'static str,
) -> Result<u32, CodecError> {
    let tok = fields.next().ok_or(CodecError::BadHeader(name))?;
    let v = parse_u32_field(tok, name)?;
    if v > MAX_U31 {
        return Err(CodecError::BadField(name));
    }
    Ok(v)
}

fn next_u32<'a>(
    fields: &mut impl Iterator<Item = &'a [u8]>,
    name: &'static str,
) -> Result<u32, CodecError> {
    let tok = fields.next().ok_or(CodecError::BadHeader(name))?;
    parse_u32_field(tok, name)
}

fn parse_u32_field(tok: &[u8], name: &'static str) -> Result<u32, CodecError> {
    if tok.is_empty() || !tok.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::BadField(name));
    }
    // Reject leading zeros other than the literal "0", matching the strict
    // single-representation-per-value posture of the rest of the codec.
    if tok.len() > 1 && tok[0] == b'0' {
        return Err(CodecError::BadField(name));
    }
    std::str::from_utf8(tok)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or(CodecError::BadField(name))
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(v.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(bytes: &[u8]) -> (Frame, usize) {
        match Codec::parse_frame(bytes).unwrap() {
            Parsed::Complete { frame, consumed } => (frame, consumed),
            Parsed::Need(n) => panic!("expected complete frame, needed {n} more bytes"),
        }
    }

    #[test]
    fn parses_simple_msg() {
        let wire = b"MSG 0 0 . 0 14\r\nThis is a test END\r\n";
        let (frame, consumed) = parse_ok(wire);
        assert_eq!(frame.frame_type, FrameType::Msg);
        assert_eq!(frame.channel, 0);
        assert_eq!(frame.msg_no, 0);
        assert!(!frame.more);
        assert_eq!(frame.seq_no, 0);
        assert_eq!(&frame.payload[..], b"This is a test");
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn parses_more_flag() {
        let wire = b"MSG 1 0 * 0 5\r\nhello END\r\n";
        let (frame, _) = parse_ok(wire);
        assert!(frame.more);
    }

    #[test]
    fn parses_ans_with_ans_no() {
        let wire = b"ANS 1 0 . 0 5 3\r\nhello END\r\n";
        let (frame, _) = parse_ok(wire);
        assert_eq!(frame.frame_type, FrameType::Ans);
        assert_eq!(frame.ans_no, Some(3));
    }

    #[test]
    fn ans_without_ans_no_is_bad_header() {
        let wire = b"ANS 1 0 . 0 5\r\nhello END\r\n";
        assert_eq!(
            Codec::parse_frame(wire),
            Err(CodecError::BadHeader("ANS frame missing ans_no"))
        );
    }

    #[test]
    fn non_ans_with_ans_no_is_bad_header() {
        let wire = b"MSG 1 0 . 0 5 3\r\nhello END\r\n";
        assert_eq!(
            Codec::parse_frame(wire),
            Err(CodecError::BadHeader("ans_no present on non-ANS frame"))
        );
    }

    #[test]
    fn parses_seq_frame() {
        let wire = b"SEQ 1 4096 8192\r\n";
        let (frame, consumed) = parse_ok(wire);
        assert_eq!(frame.frame_type, FrameType::Seq);
        assert_eq!(frame.seq_ack, Some((4096, 8192)));
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn need_more_on_short_header() {
        assert_eq!(Codec::parse_frame(b"MSG 0 0 . 0 1"), Ok(Parsed::Need(14)));
    }

    #[test]
    fn need_more_on_short_payload() {
        let partial = b"MSG 0 0 . 0 14\r\nThis is";
        match Codec::parse_frame(partial).unwrap() {
            Parsed::Need(_) => (),
            other => panic!("expected Need, got {other:?}"),
        }
    }

    #[test]
    fn bad_trailer_rejected() {
        let wire = b"MSG 0 0 . 0 5\r\nhelloXXXXX";
        assert_eq!(Codec::parse_frame(wire), Err(CodecError::BadTrailer));
    }

    #[test]
    fn bad_more_flag_rejected() {
        let wire = b"MSG 0 0 x 0 5\r\nhello END\r\n";
        assert_eq!(
            Codec::parse_frame(wire),
            Err(CodecError::BadHeader("more flag must be '.' or '*'"))
        );
    }

    #[test]
    fn unknown_type_rejected() {
        let wire = b"XXX 0 0 . 0 5\r\nhello END\r\n";
        assert_eq!(
            Codec::parse_frame(wire),
            Err(CodecError::BadHeader("unknown frame type"))
        );
    }

    #[test]
    fn non_digit_field_rejected() {
        let wire = b"MSG a 0 . 0 5\r\nhello END\r\n";
        assert_eq!(Codec::parse_frame(wire), Err(CodecError::BadField("channel")));
    }

    #[test]
    fn leading_zero_rejected() {
        let wire = b"MSG 01 0 . 0 5\r\nhello END\r\n";
        assert_eq!(Codec::parse_frame(wire), Err(CodecError::BadField("channel")));
    }

    #[test]
    fn field_over_u31_rejected() {
        let wire = b"MSG 4294967295 0 . 0 5\r\nhello END\r\n";
        assert_eq!(Codec::parse_frame(wire), Err(CodecError::BadField("channel")));
    }

    #[test]
    fn trailing_field_rejected() {
        let wire = b"MSG 0 0 . 0 5 extra\r\nhello END\r\n";
        assert_eq!(
            Codec::parse_frame(wire),
            Err(CodecError::BadHeader("ans_no present on non-ANS frame"))
        );
    }

    #[test]
    fn encode_then_parse_roundtrips() {
        let frame = Frame::data(
            FrameType::Rpy,
            2,
            7,
            false,
            1024,
            Bytes::from_static(b"payload bytes"),
            None,
        );
        let mut out = Vec::new();
        Codec::encode_frame(&frame, &mut out);
        let (parsed, consumed) = parse_ok(&out);
        assert_eq!(parsed, frame);
        assert_eq!(consumed, out.len());
    }

    #[test]
    fn encode_then_parse_seq_roundtrips() {
        let frame = Frame::seq(3, 100, 4096);
        let mut out = Vec::new();
        Codec::encode_frame(&frame, &mut out);
        let (parsed, consumed) = parse_ok(&out);
        assert_eq!(parsed, frame);
        assert_eq!(consumed, out.len());
    }

    #[test]
    fn encode_then_parse_ans_roundtrips() {
        let frame = Frame::data(
            FrameType::Ans,
            1,
            0,
            true,
            0,
            Bytes::from_static(b"chunk"),
            Some(42),
        );
        let mut out = Vec::new();
        Codec::encode_frame(&frame, &mut out);
        let (parsed, _) = parse_ok(&out);
        assert_eq!(parsed, frame);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let frame = Frame::data(FrameType::Nul, 1, 3, false, 500, Bytes::new(), None);
        let mut out = Vec::new();
        Codec::encode_frame(&frame, &mut out);
        let (parsed, _) = parse_ok(&out);
        assert_eq!(parsed, frame);
    }
}
