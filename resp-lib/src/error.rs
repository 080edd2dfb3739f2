//! Error kinds surfaced by the codec, the connection and the multiplexer.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No TCP connection could be established within `attempts` dials.
    #[error("failed to dial {endpoint} after {attempts} attempt(s): {source}")]
    Dial {
        endpoint: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Socket read or write failed. Deadlines surface here as `TimedOut`.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Eof,

    /// The bytes on the wire are not valid RESP.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A `-` reply; the message excludes the tag byte.
    #[error("{0}")]
    Server(String),

    /// The caller passed invalid arguments.
    #[error("usage error: {0}")]
    Usage(String),

    /// The server replied with a variant the command does not produce.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The multiplexer task is gone.
    #[error("multiplexer closed")]
    Closed,
}

impl Error {
    /// `true` for errors that mean the stream can no longer be trusted.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Eof | Error::Malformed(_))
    }

    /// The error a caller sees when an EOF could not be recovered.
    pub(crate) fn terminal_eof() -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer on retry",
        ))
    }

    pub(crate) fn timed_out(what: &str) -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} deadline elapsed"),
        ))
    }
}

impl From<crate::frame::Error> for Error {
    fn from(src: crate::frame::Error) -> Error {
        match src {
            crate::frame::Error::Incomplete => Error::Malformed("frame ends early".into()),
            crate::frame::Error::Other(msg) => Error::Malformed(msg),
        }
    }
}
