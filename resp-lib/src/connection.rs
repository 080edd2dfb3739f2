use crate::codec;
use crate::frame::Frame;
use crate::{Config, Error};
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, timeout};
use tracing::{debug, instrument, warn};

/// Upper bound for the pause between two dial attempts.
const MAX_DIAL_BACKOFF: Duration = Duration::from_secs(1);

/// `Connection` owns one `TcpStream` and writes encoded command frames to it
/// and reads replies back.
///
/// `read_buf` is a rolling buffer: bytes of a reply that arrive split across
/// several reads stay in it until the reply is complete, and anything past the
/// replies a caller asked for is kept for the next call.
///
/// Every read and write carries its own deadline.
#[derive(Debug)]
pub struct Connection {
    /// `None` while not connected.
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    endpoint: String,
    dial_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    reconnect_attempts: u32,
    read_buffer_size: usize,
}

impl Connection {
    /// Dials `config.endpoint`, trying up to `config.reconnect_attempts` times.
    pub async fn dial(config: &Config) -> crate::Result<Connection> {
        let stream = open(
            &config.endpoint,
            config.dial_timeout,
            config.reconnect_attempts,
        )
        .await?;

        Ok(Connection {
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            endpoint: config.endpoint.clone(),
            dial_timeout: config.dial_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            reconnect_attempts: config.reconnect_attempts,
            read_buffer_size: config.read_buffer_size,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Drops the socket and dials the same endpoint again.
    pub async fn reconnect(&mut self) -> crate::Result<()> {
        self.close();
        let stream = open(&self.endpoint, self.dial_timeout, self.reconnect_attempts).await?;
        self.stream = Some(stream);

        Ok(())
    }

    /// Writes all of `bytes` before the write deadline.
    pub async fn write_all(&mut self, bytes: &[u8]) -> crate::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        match timeout(self.write_timeout, stream.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(classify(err)),
            Err(_) => Err(Error::timed_out("write")),
        }
    }

    /// Reads whatever the socket has into the read buffer before the read
    /// deadline and returns the number of bytes read.
    ///
    /// The peer closing the stream is reported as `Error::Eof`, not as a
    /// zero-length read.
    pub async fn read(&mut self) -> crate::Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        if self.read_buf.capacity() == self.read_buf.len() {
            self.read_buf.reserve(self.read_buffer_size);
        }

        match timeout(self.read_timeout, stream.read_buf(&mut self.read_buf)).await {
            // A partial frame left in the buffer is lost either way.
            Ok(Ok(0)) => Err(Error::Eof),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(err)) => Err(classify(err)),
            Err(_) => Err(Error::timed_out("read")),
        }
    }

    /// Reads until `want` replies have been decoded.
    ///
    /// Decoding resumes at the last complete frame boundary after every read,
    /// so replies may be split across reads in any way.
    pub async fn read_replies(&mut self, want: usize) -> crate::Result<Vec<Frame>> {
        let mut replies = Vec::with_capacity(want);

        loop {
            let decoded = codec::decode(&self.read_buf, want - replies.len())?;
            self.read_buf.advance(decoded.consumed);
            replies.extend(decoded.frames);

            if replies.len() == want {
                return Ok(replies);
            }

            let n = self.read().await?;
            debug!(bytes = n, have = replies.len(), want, "read more");
        }
    }

    /// Marks the connection not connected. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(endpoint = %self.endpoint, "connection closed");
        }
        self.read_buf.clear();
    }
}

/// Dials up to `attempts` times, pausing between tries.
///
/// The pause starts at 50ms and doubles after every failure.
#[instrument(skip(dial_timeout))]
async fn open(endpoint: &str, dial_timeout: Duration, attempts: u32) -> crate::Result<TcpStream> {
    let mut backoff = Duration::from_millis(50);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match timeout(dial_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                debug!(attempt, "connected");
                return Ok(stream);
            }
            Ok(Err(err)) => {
                warn!(attempt, cause = %err, "dial failed");
                last_err = Some(err);
            }
            Err(_) => {
                warn!(attempt, "dial timed out");
                last_err = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "dial deadline elapsed",
                ));
            }
        }

        if attempt < attempts {
            time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_DIAL_BACKOFF);
        }
    }

    Err(Error::Dial {
        endpoint: endpoint.to_string(),
        attempts,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no dial attempted")),
    })
}

/// Errors that mean the peer went away become `Eof`.
fn classify(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => Error::Eof,
        _ => Error::Io(err),
    }
}

fn not_connected() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
}
