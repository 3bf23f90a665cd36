use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::encoding::{parse_num, CRLF};
use crate::reply::{Marker, Reply};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

// Status, error and header lines are short; anything longer without a CRLF is garbage.
const MAX_LINE_LENGTH: usize = 64 * 1024;

// Upper bound for speculative allocations driven by a peer-supplied array count.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// How many arrays a reply may nest. Replies are dropped and printed recursively, so the
/// bound keeps hostile input from exhausting the stack.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Verbs accepted as a bare, non-framed line at the top level of a command stream.
pub const INLINE_VERBS: [&str; 3] = ["PING", "INFO", "QUIT"];

/// Errors that make the rest of the byte stream untrustworthy. Both are fatal to the
/// connection that produced them.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The bytes do not form a frame: unknown marker, bad number, missing CRLF.
    #[error("protocol error; {0}")]
    Framing(String),
    /// The frame is well formed but its content is not acceptable.
    #[error("protocol error; {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    fn framing(msg: impl Into<String>) -> Error {
        Error::Framing(msg.into())
    }

    fn violation(msg: impl Into<String>) -> Error {
        Error::ProtocolViolation(msg.into())
    }
}

/// Where the decoder stopped. A decode that runs out of bytes leaves the state untouched so
/// the next call resumes exactly there, without re-reading anything already consumed.
#[derive(Debug)]
enum State {
    AwaitMarker,
    AwaitStatus,
    AwaitError,
    AwaitInteger,
    AwaitBulkHeader,
    AwaitArrayHeader,
    AwaitBulkBody(usize),
    AwaitCrlf(Bytes),
}

/// An array whose header was read but not all of its elements yet. The number of items
/// decoded so far is the index of the element being awaited.
#[derive(Debug)]
struct PartialArray {
    expected: usize,
    items: Vec<Reply>,
}

/// Streaming reply decoder.
///
/// Bytes are consumed from the front of the buffer as soon as a field is complete. Nested
/// arrays push onto a stack of partially decoded arrays, so a resumed decode continues
/// with the next element instead of reprocessing children already decoded.
#[derive(Debug)]
pub struct ReplyDecoder {
    state: State,
    stack: Vec<PartialArray>,
    max_frame_size: usize,
    max_depth: usize,
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyDecoder {
    pub fn new() -> ReplyDecoder {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> ReplyDecoder {
        ReplyDecoder {
            state: State::AwaitMarker,
            stack: Vec::new(),
            max_frame_size,
            max_depth: MAX_NESTING_DEPTH,
        }
    }

    /// Limits how many arrays may be open at once; an array marker beyond that is a
    /// protocol violation.
    pub fn with_max_depth(mut self, max_depth: usize) -> ReplyDecoder {
        self.max_depth = max_depth;
        self
    }

    /// True when no frame is partially decoded.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitMarker) && self.stack.is_empty()
    }

    /// Drops any partially decoded frame.
    pub fn reset(&mut self) {
        self.state = State::AwaitMarker;
        self.stack.clear();
    }

    /// Decodes the next complete reply from `src`, or returns `Ok(None)` when more bytes are
    /// needed.
    pub fn decode_reply(&mut self, src: &mut BytesMut) -> Result<Option<Reply>, Error> {
        loop {
            let value = match std::mem::replace(&mut self.state, State::AwaitMarker) {
                State::AwaitMarker => {
                    if !src.has_remaining() {
                        return Ok(None);
                    }

                    self.state = match Marker::try_from(src.get_u8()) {
                        Ok(Marker::Status) => State::AwaitStatus,
                        Ok(Marker::Error) => State::AwaitError,
                        Ok(Marker::Integer) => State::AwaitInteger,
                        Ok(Marker::Bulk) => State::AwaitBulkHeader,
                        Ok(Marker::Array) if self.stack.len() >= self.max_depth => {
                            return Err(Error::violation(format!(
                                "arrays nested deeper than {} levels",
                                self.max_depth
                            )))
                        }
                        Ok(Marker::Array) => State::AwaitArrayHeader,
                        Err(byte) => {
                            return Err(Error::framing(format!(
                                "unexpected marker '{}'",
                                byte.escape_ascii()
                            )))
                        }
                    };
                    continue;
                }
                State::AwaitStatus => match read_line(src)? {
                    Some(line) => Reply::Status(utf8(line)?),
                    None => return self.suspend(State::AwaitStatus),
                },
                State::AwaitError => match read_line(src)? {
                    Some(line) => Reply::Error(utf8(line)?),
                    None => return self.suspend(State::AwaitError),
                },
                State::AwaitInteger => match read_line(src)? {
                    Some(line) => Reply::Integer(read_integer(&line)?),
                    None => return self.suspend(State::AwaitInteger),
                },
                State::AwaitBulkHeader => {
                    let Some(line) = read_line(src)? else {
                        return self.suspend(State::AwaitBulkHeader);
                    };

                    match read_integer(&line)? {
                        -1 => Reply::Bulk(None),
                        len if len < -1 => {
                            return Err(Error::violation(format!("invalid bulk length {}", len)))
                        }
                        len if len as u64 > self.max_frame_size as u64 => {
                            return Err(Error::violation(format!(
                                "bulk length {} exceeds limit of {} bytes",
                                len, self.max_frame_size
                            )))
                        }
                        len => {
                            self.state = State::AwaitBulkBody(len as usize);
                            continue;
                        }
                    }
                }
                State::AwaitBulkBody(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len() + CRLF.len());
                        return self.suspend(State::AwaitBulkBody(len));
                    }

                    self.state = State::AwaitCrlf(src.split_to(len).freeze());
                    continue;
                }
                State::AwaitCrlf(body) => {
                    if src.len() < CRLF.len() {
                        return self.suspend(State::AwaitCrlf(body));
                    }
                    if &src[..CRLF.len()] != CRLF {
                        return Err(Error::framing("bulk string does not end in CRLF"));
                    }

                    src.advance(CRLF.len());
                    Reply::Bulk(Some(body))
                }
                State::AwaitArrayHeader => {
                    let Some(line) = read_line(src)? else {
                        return self.suspend(State::AwaitArrayHeader);
                    };

                    match read_integer(&line)? {
                        -1 => Reply::Array(None),
                        0 => Reply::Array(Some(Vec::new())),
                        count if count < -1 => {
                            return Err(Error::violation(format!("invalid array size {}", count)))
                        }
                        count if count as u64 > self.max_frame_size as u64 => {
                            return Err(Error::violation(format!(
                                "array size {} exceeds limit",
                                count
                            )))
                        }
                        count => {
                            let expected = count as usize;
                            self.stack.push(PartialArray {
                                expected,
                                items: Vec::with_capacity(expected.min(MAX_PREALLOCATED_ELEMENTS)),
                            });
                            continue;
                        }
                    }
                }
            };

            if let Some(reply) = self.complete(value) {
                return Ok(Some(reply));
            }
        }
    }

    fn suspend(&mut self, state: State) -> Result<Option<Reply>, Error> {
        self.state = state;
        Ok(None)
    }

    /// Hands a finished value to the innermost open array, closing every array that becomes
    /// full. Returns the top-level reply once nothing is left open.
    fn complete(&mut self, mut value: Reply) -> Option<Reply> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Some(value);
            };

            top.items.push(value);
            if top.items.len() < top.expected {
                return None;
            }

            let items = std::mem::take(&mut top.items);
            self.stack.pop();
            value = Reply::Array(Some(items));
        }
    }
}

/// Splits off the next CRLF-terminated line, without its terminator.
fn read_line(src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
    match src.windows(CRLF.len()).position(|window| window == CRLF) {
        Some(end) => {
            let line = src.split_to(end).freeze();
            src.advance(CRLF.len());
            Ok(Some(line))
        }
        None if src.len() > MAX_LINE_LENGTH => Err(Error::framing("line exceeds maximum length")),
        None => Ok(None),
    }
}

fn read_integer(line: &[u8]) -> Result<i64, Error> {
    parse_num(line).ok_or_else(|| {
        Error::framing(format!("invalid integer '{}'", line.escape_ascii()))
    })
}

fn utf8(line: Bytes) -> Result<String, Error> {
    String::from_utf8(line.to_vec()).map_err(|_| Error::framing("invalid UTF-8 in line"))
}

/// Client side: writes commands, reads replies.
#[derive(Debug, Default)]
pub struct ClientCodec {
    decoder: ReplyDecoder,
}

impl ClientCodec {
    pub fn new() -> ClientCodec {
        ClientCodec::default()
    }
}

impl Decoder for ClientCodec {
    type Item = Reply;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_reply(src)
    }
}

impl Encoder<Command> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl Encoder<&Command> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

/// Server side: reads commands, writes replies.
///
/// Commands are arrays of bulk strings. The verbs in [`INLINE_VERBS`] are also accepted as a
/// bare line; any other top-level byte that is not the array marker is a protocol violation,
/// and so is an array nested inside a command.
#[derive(Debug)]
pub struct ServerCodec {
    decoder: ReplyDecoder,
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCodec {
    pub fn new() -> ServerCodec {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> ServerCodec {
        ServerCodec {
            decoder: ReplyDecoder::with_max_frame_size(max_frame_size).with_max_depth(1),
        }
    }
}

impl Decoder for ServerCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.decoder.is_idle() {
            match src.first() {
                None => return Ok(None),
                Some(&b'*') => {}
                Some(_) => return decode_inline(src),
            }
        }

        match self.decoder.decode_reply(src)? {
            Some(reply) => command_from_reply(reply).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Reply> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl Encoder<&Reply> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, item: &Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

fn decode_inline(src: &mut BytesMut) -> Result<Option<Command>, Error> {
    let Some(line) = read_line(src)? else {
        return Ok(None);
    };

    let verb = line.trim_ascii().to_ascii_uppercase();
    let known = INLINE_VERBS
        .iter()
        .any(|inline| inline.as_bytes() == verb.as_slice());

    if !known {
        return Err(Error::violation(format!(
            "unexpected inline command '{}'",
            line.escape_ascii()
        )));
    }

    Ok(Command::from_args(vec![Bytes::from(verb)]))
}

fn command_from_reply(reply: Reply) -> Result<Command, Error> {
    let items = match reply {
        Reply::Array(Some(items)) => items,
        reply => {
            return Err(Error::violation(format!(
                "expected array of bulk strings, got {}",
                kind(&reply)
            )))
        }
    };

    let args = items
        .into_iter()
        .map(|item| match item {
            Reply::Bulk(Some(bytes)) => Ok(bytes),
            item => Err(Error::violation(format!(
                "expected bulk string argument, got {}",
                kind(&item)
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Command::from_args(args).ok_or_else(|| Error::violation("empty command"))
}

fn kind(reply: &Reply) -> &'static str {
    match reply {
        Reply::Status(_) => "status",
        Reply::Error(_) => "error",
        Reply::Integer(_) => "integer",
        Reply::Bulk(None) => "null bulk string",
        Reply::Bulk(Some(_)) => "bulk string",
        Reply::Array(None) => "null array",
        Reply::Array(Some(_)) => "array",
    }
}
