//! Configuration types for the connection and the multiplexer.

use crate::DEFAULT_PORT;
use std::time::Duration;

/// Options for one multiplexed connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the server.
    pub endpoint: String,

    /// Deadline for a single TCP dial.
    pub dial_timeout: Duration,

    /// Deadline for each socket read.
    pub read_timeout: Duration,

    /// Deadline for each socket write.
    pub write_timeout: Duration,

    /// Dials attempted before giving up, both initially and after an EOF.
    pub reconnect_attempts: u32,

    /// Initial capacity of the rolling read buffer.
    pub read_buffer_size: usize,

    /// Tickets wrap around at this value.
    pub ticket_ring_capacity: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: format!("127.0.0.1:{}", DEFAULT_PORT),
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
            reconnect_attempts: 2,
            read_buffer_size: 64 * 1024,
            ticket_ring_capacity: 100_000,
        }
    }
}

impl Config {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Config {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_ticket_ring_capacity(mut self, capacity: u32) -> Self {
        self.ticket_ring_capacity = capacity;
        self
    }

    /// Rejects values the multiplexer cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.endpoint.is_empty() {
            return Err(crate::Error::Usage("endpoint must not be empty".into()));
        }
        if self.reconnect_attempts == 0 {
            return Err(crate::Error::Usage(
                "reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.ticket_ring_capacity == 0 {
            return Err(crate::Error::Usage(
                "ticket_ring_capacity must be at least 1".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(crate::Error::Usage(
                "read_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
