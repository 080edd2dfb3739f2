//! Pure RESP encoding and decoding over byte buffers. No I/O happens here.
//!
//! Commands always go out as an array of bulk strings:
//!
//! ```text
//! *<n>\r\n$<len a1>\r\n<a1>\r\n ... $<len an>\r\n<an>\r\n
//! ```
//!
//! A pipeline is nothing more than encoded commands laid back to back.

use crate::frame::{self, Frame};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encodes one argument vector as a command frame.
pub fn encode<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    let mut dst = BytesMut::with_capacity(encoded_len(args));
    encode_into(args, &mut dst);
    dst.freeze()
}

/// Appends one encoded command to `dst`.
pub fn encode_into<A: AsRef<[u8]>>(args: &[A], dst: &mut BytesMut) {
    dst.reserve(encoded_len(args));
    dst.put_u8(b'*');
    put_decimal(dst, args.len() as i64);

    for arg in args {
        let arg = arg.as_ref();
        dst.put_u8(b'$');
        put_decimal(dst, arg.len() as i64);
        dst.put_slice(arg);
        dst.put_slice(CRLF);
    }
}

/// Encodes several commands into one buffer with nothing between them.
pub fn encode_pipeline<A: AsRef<[u8]>>(cmds: &[Vec<A>]) -> Bytes {
    let mut dst = BytesMut::with_capacity(cmds.iter().map(|args| encoded_len(args)).sum());
    for args in cmds {
        encode_into(args, &mut dst);
    }
    dst.freeze()
}

/// Serializes a reply frame.
///
/// Clients only ever send arrays of bulk strings, this is the server side of
/// the wire and is what scripted peers use to answer.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Simple(val) => {
            dst.put_u8(b'+');
            dst.put_slice(val.as_bytes());
            dst.put_slice(CRLF);
        }
        Frame::Error(val) => {
            dst.put_u8(b'-');
            dst.put_slice(val.as_bytes());
            dst.put_slice(CRLF);
        }
        Frame::Integer(val) => {
            dst.put_u8(b':');
            put_decimal(dst, *val);
        }
        Frame::Bulk(val) => {
            dst.put_u8(b'$');
            put_decimal(dst, val.len() as i64);
            dst.put_slice(val);
            dst.put_slice(CRLF);
        }
        Frame::Null => dst.put_slice(b"$-1\r\n"),
        Frame::NullArray => dst.put_slice(b"*-1\r\n"),
        Frame::Array(items) => {
            dst.put_u8(b'*');
            put_decimal(dst, items.len() as i64);
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}

/// Outcome of one `decode` pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub frames: Vec<Frame>,
    /// Bytes that belong to `frames`; whatever follows is a partial frame.
    pub consumed: usize,
}

impl Decoded {
    /// `true` when the buffer ended inside a frame and more bytes are needed
    /// to reach `want` replies.
    pub fn need_more(&self, want: usize) -> bool {
        self.frames.len() < want
    }
}

/// Decodes up to `max` complete replies from the front of `buf`.
///
/// A trailing partial frame is not an error: it stays unconsumed so the
/// caller can read more and resume at `consumed`.
pub fn decode(buf: &[u8], max: usize) -> Result<Decoded, crate::Error> {
    let mut out = Decoded::default();

    while out.frames.len() < max {
        let mut cursor = Cursor::new(&buf[out.consumed..]);

        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor)?;

                out.frames.push(frame);
                out.consumed += len;
            }
            Err(frame::Error::Incomplete) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(out)
}

/// Decodes exactly one reply that must fill `buf` entirely.
pub fn decode_one(buf: &[u8]) -> Result<Frame, crate::Error> {
    let mut decoded = decode(buf, 1)?;

    match decoded.frames.pop() {
        Some(frame) if decoded.consumed == buf.len() => Ok(frame),
        Some(_) => Err(crate::Error::Malformed(format!(
            "{} trailing byte(s) after frame",
            buf.len() - decoded.consumed
        ))),
        None => Err(frame::Error::Incomplete.into()),
    }
}

fn encoded_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    // tag + up to 20 digits + CRLF per header
    23 + args.iter().map(|a| a.as_ref().len() + 25).sum::<usize>()
}

fn put_decimal(dst: &mut BytesMut, val: i64) {
    dst.put_slice(val.to_string().as_bytes());
    dst.put_slice(CRLF);
}
