use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use itertools::Itertools;

use crate::encoding::{format_float, num_to_bytes, write_header, CRLF};
use crate::reply::Marker;

/// A request travelling from client to server: an ordered list of binary-safe arguments
/// where the first one is the verb.
///
/// Commands are built once and never change afterwards:
///
/// ```
/// use redwire::command::Command;
///
/// let cmd = Command::new("SET").arg("key").arg(42);
/// assert_eq!(cmd.args().len(), 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(verb: impl Into<Arg>) -> Command {
        Command {
            args: vec![verb.into().0],
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Command {
        self.args.push(arg.into().0);
        self
    }

    pub fn args_from<T: Into<Arg>>(mut self, args: impl IntoIterator<Item = T>) -> Command {
        self.args.extend(args.into_iter().map(|arg| arg.into().0));
        self
    }

    /// Builds a command from already normalized arguments. Returns `None` when there is no
    /// verb.
    pub fn from_args(args: Vec<Bytes>) -> Option<Command> {
        if args.is_empty() {
            None
        } else {
            Some(Command { args })
        }
    }

    pub fn name(&self) -> &Bytes {
        &self.args[0]
    }

    /// The verb, lowercased, for case-insensitive lookups.
    pub fn verb(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_lowercase()
    }

    /// All arguments including the verb.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Bytes> {
        self.args
    }

    /// Appends the command as an array of bulk strings.
    pub fn encode(&self, dst: &mut BytesMut) {
        let size: usize = self.args.iter().map(|arg| arg.len() + 16).sum();
        dst.reserve(size + 16);

        write_header(dst, u8::from(Marker::Array), self.args.len() as i64);
        for arg in &self.args {
            write_header(dst, u8::from(Marker::Bulk), arg.len() as i64);
            dst.put_slice(arg);
            dst.put_slice(CRLF);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.args
                .iter()
                .map(|arg| format!("\"{}\"", arg.escape_ascii()))
                .join(" ")
        )
    }
}

/// A single command argument normalized to bytes. Text is encoded as UTF-8, numbers as
/// their decimal representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arg(Bytes);

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg(value)
    }
}

impl From<&Bytes> for Arg {
    fn from(value: &Bytes) -> Self {
        Arg(value.clone())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg(Bytes::from(value))
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg(Bytes::from(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg(num_to_bytes(value))
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg(num_to_bytes(value as i64))
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg(Bytes::from(value.to_string()))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg(format_float(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_set_command() {
        let cmd = Command::new("SET").arg("k").arg("v");

        assert_eq!(
            cmd.to_bytes(),
            Bytes::from("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
        );
    }

    #[test]
    fn numbers_are_decimal_text() {
        let cmd = Command::new("INCRBY").arg("counter").arg(-300).arg(1.5);

        assert_eq!(
            cmd.args(),
            &[
                Bytes::from("INCRBY"),
                Bytes::from("counter"),
                Bytes::from("-300"),
                Bytes::from("1.5")
            ]
        );
    }

    #[test]
    fn binary_arguments_are_kept_verbatim() {
        let cmd = Command::new("SET").arg("k").arg(&b"\x00\r\n\xff"[..]);

        assert_eq!(
            cmd.to_bytes(),
            Bytes::from_static(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\n\x00\r\n\xff\r\n")
        );
    }

    #[test]
    fn verb_is_lowercased() {
        let cmd = Command::new("ZrangeByScore").arg("z");
        assert_eq!(cmd.verb(), "zrangebyscore");
    }

    #[test]
    fn from_args_requires_a_verb() {
        assert!(Command::from_args(vec![]).is_none());
        assert!(Command::from_args(vec![Bytes::from("PING")]).is_some());
    }

    #[test]
    fn display_quotes_and_escapes() {
        let cmd = Command::new("SET").arg("k").arg("a\r\nb");
        assert_eq!(cmd.to_string(), r#""SET" "k" "a\r\nb""#);
    }
}
