//! Batches commands into one round trip.
//!
//! All queued commands are encoded back to back into one buffer and submitted
//! as a single slot expecting one reply per command.
//!
//! ```no_run
//! use resp_lib::{Client, Cmd};
//!
//! # async fn dox() -> resp_lib::Result<()> {
//! let client = Client::connect("127.0.0.1:6379").await?;
//!
//! let mut pipeline = client.pipeline();
//! pipeline
//!     .add(Cmd::new("SET").arg("k").arg("v"))
//!     .add(Cmd::new("GET").arg("k"));
//!
//! let replies = pipeline.query().await?;
//! assert_eq!(replies.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::cmd::Cmd;
use crate::mux::Multiplexer;
use crate::{Error, Frame};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct Pipeline {
    mux: Arc<Multiplexer>,
    cmds: Vec<Cmd>,
}

impl Pipeline {
    pub(crate) fn new(mux: Arc<Multiplexer>) -> Pipeline {
        Pipeline {
            mux,
            cmds: Vec::new(),
        }
    }

    pub fn add(&mut self, cmd: Cmd) -> &mut Pipeline {
        self.cmds.push(cmd);
        self
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn clear(&mut self) {
        self.cmds.clear();
    }

    /// Runs the pipeline; the first `-` reply fails the whole batch with
    /// `Error::Server`.
    pub async fn query(&self) -> crate::Result<Vec<Frame>> {
        let replies = self.query_all().await?;

        match replies.iter().find(|frame| matches!(frame, Frame::Error(_))) {
            Some(frame) => Err(frame.to_error()),
            None => Ok(replies),
        }
    }

    /// Runs the pipeline and returns every reply, `-` replies included as
    /// `Frame::Error`.
    #[instrument(skip(self), fields(commands = self.cmds.len()))]
    pub async fn query_all(&self) -> crate::Result<Vec<Frame>> {
        if self.cmds.is_empty() {
            return Err(Error::Usage("pipeline is empty".into()));
        }
        if self.cmds.iter().any(Cmd::is_empty) {
            return Err(Error::Usage("pipeline holds a command with no arguments".into()));
        }

        let mut frame = BytesMut::new();
        for cmd in &self.cmds {
            cmd.encode_into(&mut frame);
        }
        debug!(bytes = frame.len(), "submitting pipeline");

        let replies = self.mux.submit(frame.freeze(), self.cmds.len()).await?;
        if replies.len() != self.cmds.len() {
            return Err(Error::Malformed(format!(
                "pipeline of {} commands got {} replies",
                self.cmds.len(),
                replies.len()
            )));
        }

        Ok(replies)
    }
}
