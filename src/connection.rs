use futures::{FutureExt, SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::{Error, ServerCodec};
use crate::command::Command;
use crate::reply::Reply;

/// Server side of one client connection: commands in, replies out.
///
/// Partially received commands stay buffered inside the codec between reads, so
/// `read_command` can be raced against other futures and dropped without losing bytes.
pub struct Connection {
    pub id: Uuid,
    pub addr: SocketAddr,
    framed: Framed<TcpStream, ServerCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Connection {
        Connection::with_codec(stream, addr, ServerCodec::new())
    }

    pub fn with_max_frame_size(
        stream: TcpStream,
        addr: SocketAddr,
        max_frame_size: usize,
    ) -> Connection {
        Connection::with_codec(stream, addr, ServerCodec::with_max_frame_size(max_frame_size))
    }

    fn with_codec(stream: TcpStream, addr: SocketAddr, codec: ServerCodec) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            addr,
            framed: Framed::new(stream, codec),
        }
    }

    /// Reads the next complete command. `None` means the peer closed the connection
    /// between two commands.
    ///
    /// Replies queued with [`feed_reply`](Self::feed_reply) are flushed before waiting on the
    /// socket, so they never sit behind a command that has only partially arrived.
    pub async fn read_command(&mut self) -> Result<Option<Command>, Error> {
        match self.framed.next().now_or_never() {
            Some(Some(command)) => return command.map(Some),
            Some(None) => {
                // The peer may have shut down only its write half.
                let _ = self.flush().await;
                return Ok(None);
            }
            None => {}
        }

        self.flush().await?;
        self.framed.next().await.transpose()
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), Error> {
        self.framed.send(reply).await
    }

    /// Queues a reply without flushing it.
    pub async fn feed_reply(&mut self, reply: &Reply) -> Result<(), Error> {
        self.framed.feed(reply).await
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        SinkExt::<&Reply>::flush(&mut self.framed).await
    }

    /// Whether more request bytes are already buffered, e.g. the rest of a pipeline.
    pub fn has_buffered_input(&self) -> bool {
        !self.framed.read_buffer().is_empty()
    }
}
