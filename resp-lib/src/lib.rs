//! A RESP client that shares one TCP connection between any number of tasks.
//!
//! The major components are:
//! * `frame`: represents a single RESP reply and parses it from bytes.
//! * `codec`: encodes commands and decodes replies, without I/O.
//! * `connection`: one socket with per-operation deadlines.
//! * `mux`: the background task that serializes callers onto the connection.
//! * `clients`: the command façade and pipelines.

#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod clients;
pub use clients::{Client, Pipeline};

pub mod cmd;
pub use cmd::{Cmd, IntoArg};

pub mod codec;

mod config;
pub use config::Config;

mod connection;
pub use connection::Connection;

mod error;
pub use error::Error;

pub mod frame;
pub use frame::Frame;

pub mod mux;
pub use mux::{Multiplexer, Stats};

/// Default port that a redis server listens on.
pub const DEFAULT_PORT: u16 = 6379;

pub type Result<T> = std::result::Result<T, Error>;
