//! A type representing one RESP reply as well as utilities for parsing
//! replies from a byte array.

use bytes::{Buf, Bytes};
use std::fmt;
use std::io::Cursor;
use std::num::TryFromIntError;
use std::string::FromUtf8Error;

/// Deepest array nesting accepted from the peer.
pub const MAX_DEPTH: usize = 512;

/// A reply in the Redis protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// `$-1`
    Null,
    Array(Vec<Frame>),
    /// `*-1`, distinct from the empty array `*0`.
    NullArray,
}

#[derive(Debug)]
pub enum Error {
    /// Not enough data is available to parse a frame.
    Incomplete,

    /// Invalid frame encoding.
    Other(String),
}

impl Frame {
    /// Checks if an entire frame can be decoded from `src`.
    ///
    /// On success the cursor is left at the end of the frame. Lengths are
    /// validated here so that `parse` never has to back out halfway.
    ///
    /// Arrays nested deeper than [`MAX_DEPTH`] are rejected.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        check_nested(src, 0)
    }

    /// The message has already been validated with `check`.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        parse_nested(src, 0)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::NullArray)
    }

    /// Payload of a simple or bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Simple(s) => Some(s.as_bytes()),
            Frame::Bulk(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// `None` for anything but an array. The null array yields an empty vec.
    pub fn into_array(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(items) => Some(items),
            Frame::NullArray => Some(Vec::new()),
            _ => None,
        }
    }

    /// Converts the frame to an "unexpected frame" error.
    pub(crate) fn to_error(&self) -> crate::Error {
        match self {
            Frame::Error(msg) => crate::Error::Server(msg.clone()),
            other => crate::Error::UnexpectedResponse(format!("{:?}", other)),
        }
    }
}

impl PartialEq<&str> for Frame {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Frame::Simple(s) => s.eq(other),
            Frame::Bulk(s) => s.eq(other),
            _ => false,
        }
    }
}

/// Rendered the way `redis-cli` prints replies.
impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Simple(response) => fmt.write_str(response),
            Frame::Error(msg) => write!(fmt, "(error) {}", msg),
            Frame::Integer(num) => write!(fmt, "(integer) {}", num),
            Frame::Bulk(msg) => match std::str::from_utf8(msg) {
                Ok(string) => write!(fmt, "\"{}\"", string),
                Err(_) => write!(fmt, "{:?}", msg),
            },
            Frame::Null | Frame::NullArray => fmt.write_str("(nil)"),
            Frame::Array(parts) if parts.is_empty() => fmt.write_str("(empty array)"),
            Frame::Array(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        writeln!(fmt)?;
                    }
                    write!(fmt, "{}) {}", i + 1, part)?;
                }

                Ok(())
            }
        }
    }
}

fn check_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<(), Error> {
    match get_u8(src)? {
        b'+' | b'-' => {
            get_line(src)?;
            Ok(())
        }
        b':' => {
            get_decimal(src)?;
            Ok(())
        }
        b'$' => match get_decimal(src)? {
            -1 => Ok(()),
            len => {
                let len = usize::try_from(len)?;
                // payload + CRLF
                skip(src, len + 2)
            }
        },
        b'*' => match get_decimal(src)? {
            -1 => Ok(()),
            len => {
                let len = usize::try_from(len)?;
                let depth = enter(depth)?;
                for _ in 0..len {
                    check_nested(src, depth)?;
                }
                Ok(())
            }
        },
        actual => Err(format!("protocol error; invalid frame type byte `{}`", actual).into()),
    }
}

fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, Error> {
    match get_u8(src)? {
        b'+' => {
            let line = get_line(src)?.to_vec();
            Ok(Frame::Simple(String::from_utf8(line)?))
        }
        b'-' => {
            let line = get_line(src)?.to_vec();
            Ok(Frame::Error(String::from_utf8(line)?))
        }
        b':' => Ok(Frame::Integer(get_decimal(src)?)),
        b'$' => {
            let len = get_decimal(src)?;
            if len == -1 {
                return Ok(Frame::Null);
            }
            let len = usize::try_from(len)?;

            // The payload is taken by count; it may contain CRLF itself.
            if src.remaining() < len + 2 {
                return Err(Error::Incomplete);
            }
            let data = Bytes::copy_from_slice(&src.chunk()[..len]);
            if &src.chunk()[len..len + 2] != b"\r\n" {
                return Err("protocol error; bulk string is not terminated by CRLF".into());
            }
            skip(src, len + 2)?;

            Ok(Frame::Bulk(data))
        }
        b'*' => {
            let len = get_decimal(src)?;
            if len == -1 {
                return Ok(Frame::NullArray);
            }
            let len = usize::try_from(len)?;
            let depth = enter(depth)?;
            let mut out = Vec::with_capacity(len.min(src.remaining()));

            for _ in 0..len {
                out.push(parse_nested(src, depth)?);
            }

            Ok(Frame::Array(out))
        }
        actual => Err(format!("protocol error; invalid frame type byte `{}`", actual).into()),
    }
}

/// Steps one array level down, failing past `MAX_DEPTH`.
fn enter(depth: usize) -> Result<usize, Error> {
    if depth >= MAX_DEPTH {
        return Err(format!("protocol error; arrays nested deeper than {}", MAX_DEPTH).into());
    }

    Ok(depth + 1)
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    src.advance(n);
    Ok(())
}

/// Reads a signed decimal line. Anything but an optional sign followed by
/// digits is rejected, as is a value outside `i64`.
fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    use atoi::FromRadix10SignedChecked;

    let line = get_line(src)?;

    match i64::from_radix_10_signed_checked(line) {
        (Some(n), used) if used == line.len() && line.iter().any(u8::is_ascii_digit) => Ok(n),
        _ => Err("protocol error; invalid decimal".into()),
    }
}

/// Finds a line terminated by CRLF and returns it without the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    let end = buf.len().saturating_sub(1);

    for i in start..end {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
    }

    Err(Error::Incomplete)
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Other(src)
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "protocol error; invalid frame format".into()
    }
}

impl From<TryFromIntError> for Error {
    fn from(_src: TryFromIntError) -> Error {
        "protocol error; invalid frame format".into()
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Incomplete => fmt.write_str("stream ended early"),
            Error::Other(err) => fmt.write_str(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Frame, Error> {
        let mut buf = Cursor::new(data);
        Frame::check(&mut buf)?;
        buf.set_position(0);
        Frame::parse(&mut buf)
    }

    #[test]
    fn integers_parse_across_the_i64_range() {
        for n in [0, 1, -1, 42, -1000, i64::MAX, i64::MIN] {
            let wire = format!(":{}\r\n", n);
            assert_eq!(parse(wire.as_bytes()).unwrap(), Frame::Integer(n));
        }
    }

    #[test]
    fn integer_overflow_is_rejected() {
        let err = parse(b":9223372036854775808\r\n").unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn integer_with_trailing_garbage_is_rejected() {
        assert!(matches!(parse(b":12ab\r\n"), Err(Error::Other(_))));
        assert!(matches!(parse(b":\r\n"), Err(Error::Other(_))));
        assert!(matches!(parse(b":-\r\n"), Err(Error::Other(_))));
    }

    #[test]
    fn bulk_string_may_contain_crlf() {
        let frame = parse(b"$8\r\nab\r\ncd\r\n\r\n").unwrap();
        assert_eq!(frame, Frame::Bulk(Bytes::from_static(b"ab\r\ncd\r\n")));
    }

    #[test]
    fn empty_bulk_consumes_trailing_line() {
        let mut buf = Cursor::new(&b"$0\r\n\r\n:1\r\n"[..]);
        assert_eq!(Frame::parse(&mut buf).unwrap(), Frame::Bulk(Bytes::new()));
        assert_eq!(buf.position(), 6);
    }

    #[test]
    fn nulls_are_distinct_from_empty() {
        assert_eq!(parse(b"$-1\r\n").unwrap(), Frame::Null);
        assert_eq!(parse(b"*-1\r\n").unwrap(), Frame::NullArray);
        assert_eq!(parse(b"*0\r\n").unwrap(), Frame::Array(vec![]));
    }

    #[test]
    fn negative_length_other_than_null_is_rejected() {
        assert!(matches!(parse(b"$-2\r\n"), Err(Error::Other(_))));
        assert!(matches!(parse(b"*-5\r\n"), Err(Error::Other(_))));
    }

    #[test]
    fn bulk_without_terminator_is_rejected() {
        assert!(matches!(parse(b"$2\r\nabXY"), Err(Error::Other(_))));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(parse(b"?what\r\n"), Err(Error::Other(_))));
    }

    #[test]
    fn partial_frames_are_incomplete() {
        for data in [
            &b""[..],
            b"+OK",
            b"+OK\r",
            b"$5\r\nab",
            b"*2\r\n:1\r\n",
            b":12",
        ] {
            assert!(matches!(parse(data), Err(Error::Incomplete)), "{:?}", data);
        }
    }

    #[test]
    fn array_of_integers() {
        assert_eq!(
            parse(b"*2\r\n:1\r\n:2\r\n").unwrap(),
            Frame::Array(vec![Frame::Integer(1), Frame::Integer(2)])
        );
    }

    #[test]
    fn nesting_up_to_the_limit_is_accepted() {
        let wire = format!("{}:1\r\n", "*1\r\n".repeat(MAX_DEPTH));
        let mut frame = parse(wire.as_bytes()).unwrap();
        for _ in 0..MAX_DEPTH {
            frame = frame.into_array().unwrap().remove(0);
        }
        assert_eq!(frame, Frame::Integer(1));
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let wire = format!("{}:1\r\n", "*1\r\n".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(wire.as_bytes()), Err(Error::Other(_))));

        let mut buf = Cursor::new(wire.as_bytes());
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Other(_))));
    }

    #[test]
    fn accessors() {
        let simple = Frame::Simple("OK".into());
        let bulk = Frame::Bulk(Bytes::from_static(b"x"));
        let binary = Frame::Bulk(Bytes::from_static(&[0xff, 0xfe]));

        assert_eq!(simple.as_bytes(), Some(&b"OK"[..]));
        assert_eq!(bulk.as_bytes(), Some(&b"x"[..]));
        assert_eq!(Frame::Integer(1).as_bytes(), None);

        assert_eq!(simple.as_str(), Some("OK"));
        assert_eq!(bulk.as_str(), Some("x"));
        assert_eq!(binary.as_str(), None);
        assert_eq!(Frame::Error("ERR".into()).as_str(), None);

        assert_eq!(Frame::Integer(-7).as_integer(), Some(-7));
        assert_eq!(bulk.as_integer(), None);

        assert!(Frame::Null.is_null());
        assert!(Frame::NullArray.is_null());
        assert!(!Frame::Array(vec![]).is_null());
        assert!(!Frame::Bulk(Bytes::new()).is_null());
    }

    #[test]
    fn into_array_treats_null_array_as_empty() {
        assert_eq!(Frame::NullArray.into_array(), Some(vec![]));
        assert_eq!(
            Frame::Array(vec![Frame::Integer(1)]).into_array(),
            Some(vec![Frame::Integer(1)])
        );
        assert_eq!(Frame::Null.into_array(), None);
        assert_eq!(Frame::Integer(1).into_array(), None);
    }

    #[test]
    fn compares_against_str() {
        assert_eq!(Frame::Bulk(Bytes::from_static(b"x")), "x");
        assert_eq!(Frame::Simple("PONG".into()), "PONG");
        assert_ne!(Frame::Bulk(Bytes::from_static(b"x")), "y");
        assert_ne!(Frame::Error("x".into()), "x");
        assert_ne!(Frame::Integer(1), "1");
    }

    #[test]
    fn display_matches_cli_output() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(b"a")),
            Frame::Integer(3),
            Frame::Null,
        ]);
        assert_eq!(frame.to_string(), "1) \"a\"\n2) (integer) 3\n3) (nil)");
    }
}
