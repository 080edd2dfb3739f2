//! Serializes any number of callers onto one `Connection`.
//!
//! Callers hand an encoded frame and the number of replies it produces to
//! [`Multiplexer::submit`]. A single background task owns the socket: it
//! takes one slot at a time from a capacity-one queue, writes the frame,
//! reads until the expected replies are in and completes the slot through its
//! oneshot sink. The next slot is not written before the current one is
//! completed, so replies never need to be matched to requests by id.
//!
//! When the peer closes the stream the task dials again and re-sends the same
//! slot once. A second EOF on that retry is handed to the caller as an I/O
//! error.
//!
//! [`Multiplexer::close`] travels on its own channel so it is never stuck
//! behind queued submissions. It fails the slot in flight and every slot
//! submitted before the call, including callers still waiting for room in
//! the queue.

use crate::frame::Frame;
use crate::{Config, Connection, Error};
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Identifies one in-flight submission.
pub type Ticket = u32;

/// Hands out tickets in `0..capacity`, wrapping around.
///
/// Wraparound is harmless: only one slot is in flight at a time, so a ticket
/// is long released before its number comes around again.
#[derive(Debug)]
struct TicketRing {
    next: Mutex<Ticket>,
    capacity: Ticket,
}

impl TicketRing {
    fn new(capacity: Ticket) -> TicketRing {
        TicketRing {
            next: Mutex::new(0),
            capacity: capacity.max(1),
        }
    }

    fn next(&self) -> Ticket {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = *next;
        *next = (ticket + 1) % self.capacity;
        ticket
    }
}

/// One submission travelling to the background task.
#[derive(Debug)]
struct Slot {
    ticket: Ticket,
    /// Close epoch observed at submit time.
    epoch: u64,
    frame: Bytes,
    expected: usize,
    /// Completion sink. Sending consumes it, so a slot completes exactly once.
    done: oneshot::Sender<crate::Result<Vec<Frame>>>,
}

/// A close request for every slot submitted before `epoch`.
#[derive(Debug)]
struct CloseRequest {
    epoch: u64,
    ack: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of the multiplexer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Slots the background task started to exchange.
    pub submitted: u64,
    /// Slots completed with replies.
    pub completed: u64,
    /// Slots completed with an error, aborted ones included.
    pub failed: u64,
    /// Successful dials made by the background task after the first one.
    pub reconnects: u64,
}

/// Handle used by callers. Dropping the last handle stops the background task
/// once the queue is empty.
#[derive(Debug)]
pub struct Multiplexer {
    queue: mpsc::Sender<Slot>,
    control: mpsc::Sender<CloseRequest>,
    tickets: TicketRing,
    epoch: AtomicU64,
    counters: Arc<Counters>,
}

impl Multiplexer {
    /// Dials the endpoint and starts the background task.
    pub async fn connect(config: Config) -> crate::Result<Multiplexer> {
        config.validate()?;
        let connection = Connection::dial(&config).await?;

        Ok(Multiplexer::start(connection, &config))
    }

    /// Starts the background task on an already dialed connection.
    pub fn start(connection: Connection, config: &Config) -> Multiplexer {
        // Capacity one: a submitter waits until the task has taken the
        // previous slot.
        let (queue, rx) = mpsc::channel(1);
        let (control, control_rx) = mpsc::channel(8);
        let counters = Arc::new(Counters::default());

        let task = Task {
            connection,
            queue: rx,
            control: control_rx,
            closed_epoch: 0,
            counters: counters.clone(),
        };
        tokio::spawn(task.run());

        Multiplexer {
            queue,
            control,
            tickets: TicketRing::new(config.ticket_ring_capacity),
            epoch: AtomicU64::new(0),
            counters,
        }
    }

    /// Sends `frame` and waits for `expected` replies.
    ///
    /// `frame` may hold several commands back to back; `expected` is then the
    /// number of commands. Replies are returned in order, `-` replies included
    /// as `Frame::Error`.
    pub async fn submit(&self, frame: Bytes, expected: usize) -> crate::Result<Vec<Frame>> {
        if expected == 0 {
            return Err(Error::Usage(
                "expected reply count must be positive".into(),
            ));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let ticket = self.tickets.next();
        let (done, completion) = oneshot::channel();

        self.queue
            .send(Slot {
                ticket,
                epoch,
                frame,
                expected,
                done,
            })
            .await
            .map_err(|_| Error::Closed)?;

        completion.await.map_err(|_| Error::Closed)?
    }

    /// Drops the socket. The slot in flight and every slot submitted before
    /// this call fail with `ConnectionAborted`.
    ///
    /// Idempotent. The next `submit` dials again.
    pub async fn close(&self) -> crate::Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (ack, acked) = oneshot::channel();

        self.control
            .send(CloseRequest { epoch, ack })
            .await
            .map_err(|_| Error::Closed)?;

        acked.await.map_err(|_| Error::Closed)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// How a slot's exchange ended.
enum Outcome {
    Done(crate::Result<Vec<Frame>>),
    Aborted(CloseRequest),
}

/// The background task. It is the only owner of the socket and of the read
/// buffer.
struct Task {
    connection: Connection,
    queue: mpsc::Receiver<Slot>,
    control: mpsc::Receiver<CloseRequest>,
    /// Slots submitted before this epoch are failed without being sent.
    closed_epoch: u64,
    counters: Arc<Counters>,
}

impl Task {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(close) = self.control.recv() => self.close(close),
                slot = self.queue.recv() => match slot {
                    Some(slot) if slot.epoch < self.closed_epoch => self.abort(slot),
                    Some(slot) => self.service(slot).await,
                    None => break,
                },
            }
        }

        self.connection.close();
        debug!("multiplexer stopped");
    }

    #[instrument(skip_all, fields(ticket = slot.ticket, expected = slot.expected))]
    async fn service(&mut self, slot: Slot) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let outcome = tokio::select! {
            biased;
            Some(close) = self.control.recv() => Outcome::Aborted(close),
            result = exchange_with_retry(
                &mut self.connection,
                &self.counters,
                &slot.frame,
                slot.expected,
            ) => Outcome::Done(result),
        };

        let result = match outcome {
            Outcome::Done(result) => result,
            Outcome::Aborted(close) => {
                self.close(close);
                Err(aborted())
            }
        };

        match &result {
            Ok(replies) => {
                debug!(?replies);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                debug!(cause = %err, "exchange failed");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        // The caller may have stopped waiting; there is nobody to tell then.
        let _ = slot.done.send(result);
    }

    fn close(&mut self, close: CloseRequest) {
        self.connection.close();
        self.closed_epoch = self.closed_epoch.max(close.epoch);
        let _ = close.ack.send(());
    }

    /// Fails a slot that was submitted before a close.
    fn abort(&mut self, slot: Slot) {
        debug!(ticket = slot.ticket, "aborted by close");
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let _ = slot.done.send(Err(aborted()));
    }
}

async fn exchange_with_retry(
    connection: &mut Connection,
    counters: &Counters,
    frame: &[u8],
    expected: usize,
) -> crate::Result<Vec<Frame>> {
    if !connection.is_connected() {
        redial(connection, counters).await?;
    }

    match exchange(connection, frame, expected).await {
        Err(Error::Eof) => {
            warn!("peer closed the connection; redialing and resending once");
            redial(connection, counters).await?;

            match exchange(connection, frame, expected).await {
                Err(Error::Eof) => Err(Error::terminal_eof()),
                other => other,
            }
        }
        other => other,
    }
}

/// One write followed by reads until `expected` replies are decoded.
///
/// A failed exchange leaves unknown bytes in flight, so the socket is
/// dropped and the next slot starts on a fresh one. Replies decoded before
/// the failure are discarded with it.
async fn exchange(
    connection: &mut Connection,
    frame: &[u8],
    expected: usize,
) -> crate::Result<Vec<Frame>> {
    let result = match connection.write_all(frame).await {
        Ok(()) => connection.read_replies(expected).await,
        Err(err) => Err(err),
    };

    if let Err(err) = &result {
        if err.is_connection_error() {
            connection.close();
        }
    }

    result
}

async fn redial(connection: &mut Connection, counters: &Counters) -> crate::Result<()> {
    match connection.reconnect().await {
        Ok(()) => {
            counters.reconnects.fetch_add(1, Ordering::Relaxed);
            info!(endpoint = %connection.endpoint(), "reconnected");
            Ok(())
        }
        Err(err) => {
            error!(cause = %err, "reconnect failed");
            Err(err)
        }
    }
}

fn aborted() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "connection closed",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_wrap_at_capacity() {
        let ring = TicketRing::new(3);
        let issued: Vec<Ticket> = (0..7).map(|_| ring.next()).collect();
        assert_eq!(issued, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn default_ring_is_bounded() {
        let ring = TicketRing::new(Config::default().ticket_ring_capacity);
        let mut last = 0;
        for _ in 0..100_001 {
            last = ring.next();
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn tickets_are_unique_across_threads() {
        let ring = Arc::new(TicketRing::new(100_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ring = ring.clone();
                std::thread::spawn(move || (0..1000).map(|_| ring.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Ticket> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
