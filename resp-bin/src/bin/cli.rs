#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

use bytes::Bytes;
use clap::{Parser, Subcommand};
use resp_lib::{Client, Cmd, Config, Error, Frame, DEFAULT_PORT};
use std::num::ParseIntError;
use std::str;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resp-cli", version, author, about = "Issue RESP commands")]
struct CliCommand {
    #[clap(subcommand)]
    sub_cmd: Command,

    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Dial deadline in milliseconds.
    #[clap(long, value_parser = duration_from, default_value = "5000")]
    dial_timeout: Duration,

    /// Read deadline in milliseconds.
    #[clap(long, value_parser = duration_from, default_value = "2000")]
    read_timeout: Duration,

    /// Write deadline in milliseconds.
    #[clap(long, value_parser = duration_from, default_value = "1000")]
    write_timeout: Duration,

    #[clap(long, default_value_t = 2)]
    reconnect_attempts: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping {
        msg: Option<Bytes>,
    },
    Get {
        key: String,
    },
    Set {
        key: String,
        value: Bytes,
        /// Expiry in milliseconds.
        #[clap(value_parser = duration_from)]
        expires: Option<Duration>,
    },
    Del {
        #[clap(required = true)]
        keys: Vec<String>,
    },
    /// Send any command as-is, e.g. `raw HGETALL h`.
    Raw {
        #[clap(required = true)]
        args: Vec<String>,
    },
}

fn duration_from(src: &str) -> Result<Duration, ParseIntError> {
    let ms = src.parse::<u64>()?;
    Ok(Duration::from_millis(ms))
}

fn print_bytes(bytes: &Bytes) {
    if let Ok(string) = str::from_utf8(bytes) {
        println!("\"{}\"", string);
    } else {
        println!("{:?}", bytes);
    }
}

/// `flavor = "current_thread"` is used here to make CLI lighter instead of multi-threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()?;

    let cmd = CliCommand::parse();

    let config = Config::new(format!("{}:{}", cmd.host, cmd.port))
        .with_dial_timeout(cmd.dial_timeout)
        .with_read_timeout(cmd.read_timeout)
        .with_write_timeout(cmd.write_timeout)
        .with_reconnect_attempts(cmd.reconnect_attempts);
    debug!(?config, "connecting");

    let client = Client::with_config(config).await?;

    match cmd.sub_cmd {
        Command::Ping { msg } => {
            print_bytes(&client.ping(msg).await?);
        }
        Command::Get { key } => match client.get(&key).await? {
            Some(bytes) => print_bytes(&bytes),
            None => println!("(nil)"),
        },
        Command::Set {
            key,
            value,
            expires: None,
        } => {
            client.set(&key, value).await?;
            println!("OK");
        }
        Command::Set {
            key,
            value,
            expires: Some(expires),
        } => {
            client.set_expires(&key, value, expires).await?;
            println!("OK");
        }
        Command::Del { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            println!("{}", Frame::Integer(client.del(&keys).await?));
        }
        Command::Raw { args } => match client.execute(Cmd::from_args(args)).await {
            Ok(frame) => println!("{}", frame),
            Err(Error::Server(msg)) => println!("{}", Frame::Error(msg)),
            Err(err) => return Err(err.into()),
        },
    }

    client.close().await?;
    Ok(())
}
