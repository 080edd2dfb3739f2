//! Argument vectors for outgoing commands.

use crate::codec;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Converts a value into one command argument.
///
/// Numbers are sent as their decimal text, which is how Redis expects them.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &Bytes {
    fn into_arg(self) -> Bytes {
        self.clone()
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self.into_bytes())
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

macro_rules! decimal_arg {
    ($($t:ty),*) => {
        $(
            impl IntoArg for $t {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

decimal_arg!(i32, i64, u32, u64, usize, f64);

/// A command name followed by its arguments.
///
/// ```
/// use resp_lib::Cmd;
///
/// let cmd = Cmd::new("SET").arg("k").arg("v");
/// assert_eq!(&cmd.encode()[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    pub fn new(name: impl IntoArg) -> Cmd {
        Cmd {
            args: vec![name.into_arg()],
        }
    }

    /// Builds a command from a complete argument vector, name first.
    pub fn from_args<I, A>(args: I) -> Cmd
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        Cmd {
            args: args.into_iter().map(IntoArg::into_arg).collect(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl IntoArg) -> Cmd {
        self.args.push(arg.into_arg());
        self
    }

    pub fn push(&mut self, arg: impl IntoArg) {
        self.args.push(arg.into_arg());
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn encode(&self) -> Bytes {
        codec::encode(&self.args)
    }

    pub(crate) fn encode_into(&self, dst: &mut BytesMut) {
        codec::encode_into(&self.args, dst);
    }
}

/// Space separated, lossy for non UTF-8 arguments.
impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_become_decimal_text() {
        let cmd = Cmd::new("ZADD").arg("z").arg(1.5f64).arg(-3i64).arg(7usize);
        assert_eq!(cmd.to_string(), "ZADD z 1.5 -3 7");
    }

    #[test]
    fn from_args_keeps_order() {
        let cmd = Cmd::from_args(["HGETALL", "h"]);
        assert_eq!(cmd, Cmd::new("HGETALL").arg("h"));
        assert_eq!(&cmd.encode()[..], b"*2\r\n$7\r\nHGETALL\r\n$1\r\nh\r\n");
    }

    #[test]
    fn binary_arguments_are_kept_verbatim() {
        let cmd = Cmd::new("SET").arg("k").arg(&b"\x00\r\n\xff"[..]);
        assert_eq!(
            &cmd.encode()[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\n\x00\r\n\xff\r\n"
        );
    }
}
