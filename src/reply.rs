// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{write_header, CRLF};

/// A reply travelling from server to client. Replies are plain values: two replies are the
/// same reply when their contents are equal.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Simple one-line acknowledgement, e.g. `+OK`.
    Status(String),
    /// Simple one-line failure description, e.g. `-ERR unknown command`.
    Error(String),
    Integer(i64),
    /// Binary-safe value; `None` is the null bulk string (`$-1`).
    Bulk(Option<Bytes>),
    /// Nested replies; `None` is the null array (`*-1`).
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Status("OK".to_string())
    }

    pub fn status(status: impl Into<String>) -> Reply {
        Reply::Status(status.into())
    }

    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(Some(data.into()))
    }

    /// The null bulk string.
    pub fn nil() -> Reply {
        Reply::Bulk(None)
    }

    pub fn array(replies: impl IntoIterator<Item = Reply>) -> Reply {
        Reply::Array(Some(replies.into_iter().collect()))
    }

    /// An array of bulk strings.
    pub fn bulks<T: Into<Bytes>>(items: impl IntoIterator<Item = T>) -> Reply {
        Reply::array(items.into_iter().map(Reply::bulk))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(replies) => replies,
            _ => None,
        }
    }

    /// Appends the wire representation of this reply to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Reply::Status(s) => write_line(dst, u8::from(Marker::Status), s),
            Reply::Error(s) => write_line(dst, u8::from(Marker::Error), s),
            Reply::Integer(i) => write_header(dst, u8::from(Marker::Integer), *i),
            Reply::Bulk(None) => write_header(dst, u8::from(Marker::Bulk), -1),
            Reply::Bulk(Some(bytes)) => {
                dst.reserve(bytes.len() + 16);
                write_header(dst, u8::from(Marker::Bulk), bytes.len() as i64);
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            Reply::Array(None) => write_header(dst, u8::from(Marker::Array), -1),
            Reply::Array(Some(replies)) => {
                write_header(dst, u8::from(Marker::Array), replies.len() as i64);
                for reply in replies {
                    reply.encode(dst);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Writes a one-line reply. A CR or LF inside `line` would end the reply early, so both are
/// written as spaces.
fn write_line(dst: &mut BytesMut, marker: u8, line: &str) {
    dst.reserve(line.len() + 3);
    dst.put_u8(marker);
    dst.extend(line.bytes().map(|b| match b {
        b'\r' | b'\n' => b' ',
        b => b,
    }));
    dst.put_slice(CRLF);
}

impl From<Reply> for Bytes {
    fn from(reply: Reply) -> Self {
        reply.to_bytes()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "+{}", s),
            Reply::Error(s) => write!(f, "-{}", s),
            Reply::Integer(i) => write!(f, ":{}", i),
            Reply::Bulk(Some(bytes)) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Reply::Bulk(None) => write!(f, "$-1"),
            Reply::Array(None) => write!(f, "*-1"),
            Reply::Array(Some(replies)) => {
                write!(f, "*{}", replies.len())?;
                for reply in replies {
                    write!(f, " {}", reply)?;
                }
                Ok(())
            }
        }
    }
}

/// The first byte of every frame identifies its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    Status,  // '+'
    Error,   // '-'
    Integer, // ':'
    Bulk,    // '$'
    Array,   // '*'
}

impl TryFrom<u8> for Marker {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            b'+' => Ok(Self::Status),
            b'-' => Ok(Self::Error),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::Bulk),
            b'*' => Ok(Self::Array),
            _ => Err(byte),
        }
    }
}

impl From<Marker> for u8 {
    fn from(value: Marker) -> Self {
        match value {
            Marker::Status => b'+',
            Marker::Error => b'-',
            Marker::Integer => b':',
            Marker::Bulk => b'$',
            Marker::Array => b'*',
        }
    }
}
