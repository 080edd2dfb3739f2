//! Redis client implementation
//!
//! Provides an async connect and methods for issuing commands over one shared,
//! multiplexed connection.

use crate::clients::Pipeline;
use crate::cmd::{Cmd, IntoArg};
use crate::mux::{Multiplexer, Stats};
use crate::{Config, Error, Frame};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Cloning is cheap; every clone talks through the same socket.
#[derive(Clone, Debug)]
pub struct Client {
    mux: Arc<Multiplexer>,
}

impl Client {
    /// Establish a connection with the Redis server located at `addr`, using
    /// default timeouts.
    pub async fn connect(addr: impl Into<String>) -> crate::Result<Client> {
        Client::with_config(Config::new(addr)).await
    }

    pub async fn with_config(config: Config) -> crate::Result<Client> {
        let mux = Multiplexer::connect(config).await?;

        Ok(Client { mux: Arc::new(mux) })
    }

    /// Sends one command and returns its reply.
    ///
    /// A `-` reply becomes `Error::Server`.
    pub async fn execute(&self, cmd: Cmd) -> crate::Result<Frame> {
        match self.query(cmd).await? {
            Frame::Error(msg) => Err(Error::Server(msg)),
            frame => Ok(frame),
        }
    }

    /// Starts an empty pipeline on this connection.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.mux.clone())
    }

    /// Drops the socket. Commands issued before the call and not yet answered
    /// fail with `ConnectionAborted`; the next command dials again.
    pub async fn close(&self) -> crate::Result<()> {
        self.mux.close().await
    }

    pub fn stats(&self) -> Stats {
        self.mux.stats()
    }

    /// [Ping] the server. Returns `PONG`, or `msg` when one is given.
    #[instrument(skip(self))]
    pub async fn ping(&self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        let mut cmd = Cmd::new("PING");
        if let Some(msg) = msg {
            cmd.push(msg);
        }

        match self.execute(cmd).await? {
            Frame::Simple(value) => Ok(value.into()),
            Frame::Bulk(value) => Ok(value),
            frame => Err(frame.to_error()),
        }
    }

    /// Get the value of key.
    ///
    /// If the key does not exist `None` is returned.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> crate::Result<Option<Bytes>> {
        let frame = self.execute(Cmd::new("GET").arg(key)).await?;
        optional_bulk(frame)
    }

    /// Set `key` to hold the given `value`.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: impl IntoArg) -> crate::Result<()> {
        let frame = self.execute(Cmd::new("SET").arg(key).arg(value)).await?;
        ok(frame)
    }

    /// Set `key` to hold `value`; the key expires after `expiration`.
    #[instrument(skip(self, value))]
    pub async fn set_expires(
        &self,
        key: &str,
        value: impl IntoArg,
        expiration: Duration,
    ) -> crate::Result<()> {
        let cmd = Cmd::new("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(expiration.as_millis() as u64);

        ok(self.execute(cmd).await?)
    }

    /// Returns the number of keys removed.
    #[instrument(skip(self))]
    pub async fn del(&self, keys: &[&str]) -> crate::Result<i64> {
        integer(self.execute(with_all(Cmd::new("DEL"), keys)).await?)
    }

    /// Returns how many of `keys` exist.
    #[instrument(skip(self))]
    pub async fn exists(&self, keys: &[&str]) -> crate::Result<i64> {
        integer(self.execute(with_all(Cmd::new("EXISTS"), keys)).await?)
    }

    /// `false` when the key does not exist.
    #[instrument(skip(self))]
    pub async fn expire(&self, key: &str, ttl: Duration) -> crate::Result<bool> {
        let cmd = Cmd::new("EXPIRE").arg(key).arg(ttl.as_secs());
        Ok(integer(self.execute(cmd).await?)? == 1)
    }

    #[instrument(skip(self))]
    pub async fn dbsize(&self) -> crate::Result<i64> {
        integer(self.execute(Cmd::new("DBSIZE")).await?)
    }

    /// Returns the number of fields added.
    #[instrument(skip(self, value))]
    pub async fn hset(&self, key: &str, field: &str, value: impl IntoArg) -> crate::Result<i64> {
        let cmd = Cmd::new("HSET").arg(key).arg(field).arg(value);
        integer(self.execute(cmd).await?)
    }

    #[instrument(skip(self))]
    pub async fn hget(&self, key: &str, field: &str) -> crate::Result<Option<Bytes>> {
        optional_bulk(self.execute(Cmd::new("HGET").arg(key).arg(field)).await?)
    }

    /// One entry per field, `None` for missing fields.
    #[instrument(skip(self))]
    pub async fn hmget(&self, key: &str, fields: &[&str]) -> crate::Result<Vec<Option<Bytes>>> {
        let frame = self
            .execute(with_all(Cmd::new("HMGET").arg(key), fields))
            .await?;

        array(frame)?.into_iter().map(optional_bulk).collect()
    }

    #[instrument(skip(self, pairs))]
    pub async fn hmset(&self, key: &str, pairs: &[(&str, Bytes)]) -> crate::Result<()> {
        let mut cmd = Cmd::new("HMSET").arg(key);
        for (field, value) in pairs {
            cmd.push(*field);
            cmd.push(value);
        }

        ok(self.execute(cmd).await?)
    }

    /// Field/value pairs in the order the server sent them.
    #[instrument(skip(self))]
    pub async fn hgetall(&self, key: &str) -> crate::Result<Vec<(Bytes, Bytes)>> {
        let items = bulk_array(self.execute(Cmd::new("HGETALL").arg(key)).await?)?;
        if items.len() % 2 != 0 {
            return Err(Error::UnexpectedResponse(format!(
                "HGETALL returned {} items, expected pairs",
                items.len()
            )));
        }

        let mut items = items.into_iter();
        let mut pairs = Vec::with_capacity(items.len() / 2);
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            pairs.push((field, value));
        }

        Ok(pairs)
    }

    /// Returns the value of the field after the increment.
    #[instrument(skip(self))]
    pub async fn hincrby(&self, key: &str, field: &str, increment: i64) -> crate::Result<i64> {
        let cmd = Cmd::new("HINCRBY").arg(key).arg(field).arg(increment);
        integer(self.execute(cmd).await?)
    }

    /// Returns the number of members added.
    #[instrument(skip(self))]
    pub async fn sadd(&self, key: &str, members: &[&str]) -> crate::Result<i64> {
        integer(self.execute(with_all(Cmd::new("SADD").arg(key), members)).await?)
    }

    #[instrument(skip(self))]
    pub async fn sismember(&self, key: &str, member: &str) -> crate::Result<bool> {
        let cmd = Cmd::new("SISMEMBER").arg(key).arg(member);
        Ok(integer(self.execute(cmd).await?)? == 1)
    }

    #[instrument(skip(self))]
    pub async fn smembers(&self, key: &str) -> crate::Result<Vec<Bytes>> {
        bulk_array(self.execute(Cmd::new("SMEMBERS").arg(key)).await?)
    }

    /// Returns the number of members added.
    #[instrument(skip(self))]
    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> crate::Result<i64> {
        let cmd = Cmd::new("ZADD").arg(key).arg(score).arg(member);
        integer(self.execute(cmd).await?)
    }

    #[instrument(skip(self))]
    pub async fn zscore(&self, key: &str, member: &str) -> crate::Result<Option<f64>> {
        let frame = self.execute(Cmd::new("ZSCORE").arg(key).arg(member)).await?;

        match optional_bulk(frame)? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .map(Some)
                .ok_or_else(|| Error::UnexpectedResponse(format!("invalid score {:?}", raw))),
            None => Ok(None),
        }
    }

    /// With `with_scores` the result alternates member and score.
    #[instrument(skip(self))]
    pub async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        with_scores: bool,
    ) -> crate::Result<Vec<Bytes>> {
        let mut cmd = Cmd::new("ZRANGE").arg(key).arg(start).arg(stop);
        if with_scores {
            cmd.push("WITHSCORES");
        }

        bulk_array(self.execute(cmd).await?)
    }

    /// `limit` is `(offset, count)`.
    #[instrument(skip(self))]
    pub async fn zrangebyscore(
        &self,
        key: &str,
        min: &str,
        max: &str,
        with_scores: bool,
        limit: Option<(i64, i64)>,
    ) -> crate::Result<Vec<Bytes>> {
        let mut cmd = Cmd::new("ZRANGEBYSCORE").arg(key).arg(min).arg(max);
        if with_scores {
            cmd.push("WITHSCORES");
        }
        if let Some((offset, count)) = limit {
            cmd.push("LIMIT");
            cmd.push(offset);
            cmd.push(count);
        }

        bulk_array(self.execute(cmd).await?)
    }

    /// Returns the length of the list after the push.
    #[instrument(skip(self, values))]
    pub async fn lpush(&self, key: &str, values: &[Bytes]) -> crate::Result<i64> {
        let mut cmd = Cmd::new("LPUSH").arg(key);
        for value in values {
            cmd.push(value);
        }

        integer(self.execute(cmd).await?)
    }

    #[instrument(skip(self))]
    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> crate::Result<()> {
        ok(self.execute(Cmd::new("LTRIM").arg(key).arg(start).arg(stop)).await?)
    }

    #[instrument(skip(self))]
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> crate::Result<Vec<Bytes>> {
        bulk_array(self.execute(Cmd::new("LRANGE").arg(key).arg(start).arg(stop)).await?)
    }

    /// Submits `cmd` and returns the single reply, `-` replies included.
    async fn query(&self, cmd: Cmd) -> crate::Result<Frame> {
        if cmd.is_empty() {
            return Err(Error::Usage("command has no arguments".into()));
        }
        debug!(request = %cmd);

        let mut replies = self.mux.submit(cmd.encode(), 1).await?;
        debug!(response = ?replies);

        replies
            .pop()
            .ok_or_else(|| Error::Malformed("no reply for command".into()))
    }
}

fn with_all(mut cmd: Cmd, args: &[&str]) -> Cmd {
    for arg in args {
        cmd.push(*arg);
    }
    cmd
}

fn ok(frame: Frame) -> crate::Result<()> {
    match frame {
        Frame::Simple(ref s) if s == "OK" => Ok(()),
        frame => Err(frame.to_error()),
    }
}

fn integer(frame: Frame) -> crate::Result<i64> {
    match frame {
        Frame::Integer(n) => Ok(n),
        frame => Err(frame.to_error()),
    }
}

/// Both `Simple` and `Bulk` are accepted; `Null` means absent.
fn optional_bulk(frame: Frame) -> crate::Result<Option<Bytes>> {
    match frame {
        Frame::Bulk(value) => Ok(Some(value)),
        Frame::Simple(value) => Ok(Some(value.into())),
        Frame::Null => Ok(None),
        frame => Err(frame.to_error()),
    }
}

fn array(frame: Frame) -> crate::Result<Vec<Frame>> {
    match frame {
        Frame::Array(items) => Ok(items),
        Frame::NullArray => Ok(Vec::new()),
        frame => Err(frame.to_error()),
    }
}

fn bulk_array(frame: Frame) -> crate::Result<Vec<Bytes>> {
    array(frame)?
        .into_iter()
        .map(|item| match item {
            Frame::Bulk(value) => Ok(value),
            Frame::Simple(value) => Ok(value.into()),
            other => Err(other.to_error()),
        })
        .collect()
}
