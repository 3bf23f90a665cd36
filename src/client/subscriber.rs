use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::str::FromStr;
use strum_macros::EnumString;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::client::Error;
use crate::codec::ClientCodec;
use crate::command::{Arg, Command};
use crate::reply::Reply;

#[derive(Debug, EnumString)]
#[strum(serialize_all = "lowercase")]
enum PushKind {
    Subscribe,
    Unsubscribe,
    Psubscribe,
    Punsubscribe,
    Message,
    Pmessage,
    Pong,
}

/// Something the server pushed to a subscribed connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    Subscribe { channel: Bytes, count: i64 },
    /// `channel` is `None` when there was nothing left to unsubscribe from.
    Unsubscribe { channel: Option<Bytes>, count: i64 },
    Psubscribe { pattern: Bytes, count: i64 },
    Punsubscribe { pattern: Option<Bytes>, count: i64 },
    Message { channel: Bytes, payload: Bytes },
    Pmessage { pattern: Bytes, channel: Bytes, payload: Bytes },
    Pong(Bytes),
}

impl TryFrom<Reply> for Push {
    type Error = Error;

    fn try_from(reply: Reply) -> Result<Self, Self::Error> {
        let unexpected = || Error::UnexpectedReply(reply.clone());

        let Reply::Array(Some(items)) = &reply else {
            return Err(unexpected());
        };

        let kind = items
            .first()
            .and_then(Reply::as_bulk)
            .and_then(|kind| std::str::from_utf8(kind).ok())
            .and_then(|kind| PushKind::from_str(kind).ok())
            .ok_or_else(unexpected)?;

        let bulk = |i: usize| items.get(i).and_then(Reply::as_bulk).cloned();
        let optional_bulk = |i: usize| match items.get(i) {
            Some(Reply::Bulk(value)) => Some(value.clone()),
            _ => None,
        };
        let integer = |i: usize| items.get(i).and_then(Reply::as_integer);

        let push = match kind {
            PushKind::Subscribe => bulk(1)
                .zip(integer(2))
                .map(|(channel, count)| Push::Subscribe { channel, count }),
            PushKind::Unsubscribe => optional_bulk(1)
                .zip(integer(2))
                .map(|(channel, count)| Push::Unsubscribe { channel, count }),
            PushKind::Psubscribe => bulk(1)
                .zip(integer(2))
                .map(|(pattern, count)| Push::Psubscribe { pattern, count }),
            PushKind::Punsubscribe => optional_bulk(1)
                .zip(integer(2))
                .map(|(pattern, count)| Push::Punsubscribe { pattern, count }),
            PushKind::Message => bulk(1)
                .zip(bulk(2))
                .map(|(channel, payload)| Push::Message { channel, payload }),
            PushKind::Pmessage => bulk(1).zip(bulk(2)).zip(bulk(3)).map(
                |((pattern, channel), payload)| Push::Pmessage {
                    pattern,
                    channel,
                    payload,
                },
            ),
            PushKind::Pong => bulk(1).map(Push::Pong),
        };

        push.ok_or_else(unexpected)
    }
}

/// A connection dedicated to pub/sub. Subscription acknowledgements and messages arrive
/// in the order the server sent them through [`Subscriber::next_push`].
pub struct Subscriber {
    framed: Framed<TcpStream, ClientCodec>,
}

impl Subscriber {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Subscriber, Error> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Subscriber::new(stream))
    }

    pub fn new(stream: TcpStream) -> Subscriber {
        Subscriber {
            framed: Framed::new(stream, ClientCodec::new()),
        }
    }

    pub async fn subscribe<T: Into<Arg>>(
        &mut self,
        channels: impl IntoIterator<Item = T>,
    ) -> Result<(), Error> {
        self.send(Command::new("SUBSCRIBE").args_from(channels)).await
    }

    pub async fn unsubscribe<T: Into<Arg>>(
        &mut self,
        channels: impl IntoIterator<Item = T>,
    ) -> Result<(), Error> {
        self.send(Command::new("UNSUBSCRIBE").args_from(channels)).await
    }

    pub async fn psubscribe<T: Into<Arg>>(
        &mut self,
        patterns: impl IntoIterator<Item = T>,
    ) -> Result<(), Error> {
        self.send(Command::new("PSUBSCRIBE").args_from(patterns)).await
    }

    pub async fn punsubscribe<T: Into<Arg>>(
        &mut self,
        patterns: impl IntoIterator<Item = T>,
    ) -> Result<(), Error> {
        self.send(Command::new("PUNSUBSCRIBE").args_from(patterns)).await
    }

    pub async fn ping(&mut self, message: impl Into<Arg>) -> Result<(), Error> {
        self.send(Command::new("PING").arg(message)).await
    }

    async fn send(&mut self, command: Command) -> Result<(), Error> {
        self.framed.send(command).await?;
        Ok(())
    }

    /// Waits for the next push. `None` once the server closed the connection.
    pub async fn next_push(&mut self) -> Result<Option<Push>, Error> {
        match self.framed.next().await {
            Some(reply) => Push::try_from(reply?).map(Some),
            None => Ok(None),
        }
    }
}
