//! A scripted RESP peer for integration tests.
//!
//! Each accepted connection follows its own list of exchanges. An exchange
//! waits for `commands` complete commands and then performs its action.
//! Commands received on every connection are recorded in arrival order.

#![allow(dead_code)]

use bytes::{Buf, Bytes, BytesMut};
use resp_lib::{codec, Frame};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub enum Action {
    /// Write these bytes in one go.
    Reply(&'static [u8]),
    /// Write each chunk separately with a pause in between.
    Chunks(Vec<&'static [u8]>),
    /// Write these bytes, then drop the socket.
    ReplyThenClose(&'static [u8]),
    /// Drop the socket without answering.
    Close,
    /// Keep the socket open and never answer.
    Hang,
}

pub struct Exchange {
    pub commands: usize,
    pub action: Action,
}

pub fn reply(bytes: &'static [u8]) -> Exchange {
    Exchange {
        commands: 1,
        action: Action::Reply(bytes),
    }
}

pub fn close() -> Exchange {
    Exchange {
        commands: 1,
        action: Action::Close,
    }
}

pub fn hang() -> Exchange {
    Exchange {
        commands: 1,
        action: Action::Hang,
    }
}

pub type Received = Arc<Mutex<Vec<Vec<Bytes>>>>;

pub struct MockServer {
    pub addr: String,
    pub received: Received,
}

impl MockServer {
    /// Serves one script per accepted connection, in accept order.
    pub async fn start(scripts: Vec<Vec<Exchange>>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received = Received::default();

        let log = received.clone();
        tokio::spawn(async move {
            for script in scripts {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                tokio::spawn(serve(socket, script, log.clone()));
            }
        });

        MockServer { addr, received }
    }

    pub fn received(&self) -> Vec<Vec<Bytes>> {
        self.received.lock().unwrap().clone()
    }
}

async fn serve(mut socket: TcpStream, script: Vec<Exchange>, log: Received) {
    let mut buf = BytesMut::new();

    for exchange in script {
        for _ in 0..exchange.commands {
            match read_command(&mut socket, &mut buf).await {
                Some(args) => log.lock().unwrap().push(args),
                None => return,
            }
        }

        match exchange.action {
            Action::Reply(bytes) => {
                if socket.write_all(bytes).await.is_err() {
                    return;
                }
            }
            Action::Chunks(chunks) => {
                for chunk in chunks {
                    if socket.write_all(chunk).await.is_err() {
                        return;
                    }
                    socket.flush().await.ok();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
            Action::ReplyThenClose(bytes) => {
                let _ = socket.write_all(bytes).await;
                return;
            }
            Action::Close => return,
            Action::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
        }
    }

    // Script done: hold the socket until the client lets go.
    let mut sink = [0u8; 512];
    while let Ok(n) = socket.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

/// Reads one command, returned as its argument vector.
pub async fn read_command(socket: &mut TcpStream, buf: &mut BytesMut) -> Option<Vec<Bytes>> {
    loop {
        let decoded = codec::decode(&buf[..], 1).ok()?;
        let consumed = decoded.consumed;

        if let Some(frame) = decoded.frames.into_iter().next() {
            buf.advance(consumed);
            return match frame {
                Frame::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        Frame::Bulk(arg) => Some(arg),
                        _ => None,
                    })
                    .collect(),
                _ => None,
            };
        }

        if socket.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }
}

/// Shorthand for building an expected argument vector.
pub fn args(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|part| Bytes::copy_from_slice(part.as_bytes()))
        .collect()
}
