//! A relay between clients and an upstream server.
//!
//! Every accepted connection gets its own upstream connection. In [`Mode::Raw`] bytes are
//! copied through pooled buffers untouched; in [`Mode::Framed`] commands and replies are
//! decoded and re-encoded, so anything malformed is stopped at the proxy. Either side
//! failing tears down both.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use strum_macros::{Display, EnumString};
use thiserror::Error as ThisError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::codec::{self, ClientCodec, ServerCodec};

pub const DEFAULT_PORT: u16 = 63790;
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

// Buffers kept around for reuse; extra ones are dropped when returned.
const MAX_POOLED_BUFFERS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mode {
    #[default]
    Raw,
    Framed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `host:port` of the real server.
    pub upstream: String,
    /// Size of each relay buffer in raw mode.
    pub buffer_size: usize,
    pub mode: Mode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            upstream: "127.0.0.1:6379".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            mode: Mode::Raw,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("upstream {upstream} unavailable: {source}")]
    UpstreamUnavailable { upstream: String, source: io::Error },
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Relay buffers shared by every connection of one proxy.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> BufferPool {
        BufferPool {
            buffers: Mutex::new(Vec::new()),
            buffer_size,
        }
    }

    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));

        PooledBuffer {
            buffer: Some(buffer),
            pool: self.clone(),
        }
    }

    fn put(&self, mut buffer: BytesMut) {
        buffer.clear();
        if buffer.capacity() < self.buffer_size {
            return;
        }

        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if buffers.len() < MAX_POOLED_BUFFERS {
            buffers.push(buffer);
        }
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A buffer borrowed from a [`BufferPool`]; it goes back to the pool when dropped, whether
/// the relay finished cleanly or not.
pub struct PooledBuffer {
    buffer: Option<BytesMut>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    fn buffer_mut(&mut self) -> &mut BytesMut {
        self.buffer.get_or_insert_with(BytesMut::new)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.put(buffer);
        }
    }
}

pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

    serve(listener, config).await
}

pub async fn serve(listener: TcpListener, config: Config) -> Result<(), Error> {
    let config = Arc::new(config);
    let pool = Arc::new(BufferPool::new(config.buffer_size));

    info!(
        upstream = %config.upstream,
        mode = %config.mode,
        "redwire proxy listening on {}",
        listener.local_addr()?
    );

    loop {
        let (socket, client_address) = listener.accept().await?;
        let config = config.clone();
        let pool = pool.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            match relay(socket, client_address, config, pool).await {
                Ok(()) => {}
                Err(e @ Error::UpstreamUnavailable { .. }) => warn!(error = %e, "relay aborted"),
                Err(e) => error!(error = %e, "relay failed"),
            }
        });
    }
}

#[instrument(
    name = "relay",
    skip(client, config, pool),
    fields(connection_id = %Uuid::new_v4(), client_address = %client_address)
)]
async fn relay(
    client: TcpStream,
    client_address: SocketAddr,
    config: Arc<Config>,
    pool: Arc<BufferPool>,
) -> Result<(), Error> {
    let upstream = TcpStream::connect(config.upstream.as_str())
        .await
        .map_err(|source| Error::UpstreamUnavailable {
            upstream: config.upstream.clone(),
            source,
        })?;

    let _ = client.set_nodelay(true);
    let _ = upstream.set_nodelay(true);

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    // try_join drops the other direction as soon as one fails, closing both sockets.
    let result = match config.mode {
        Mode::Raw => tokio::try_join!(
            copy_raw(client_read, upstream_write, pool.get()),
            copy_raw(upstream_read, client_write, pool.get())
        )
        .map(|_| ()),
        Mode::Framed => tokio::try_join!(
            forward_commands(client_read, upstream_write),
            forward_replies(upstream_read, client_write)
        )
        .map(|_| ()),
    };

    info!("Connection closed");
    result
}

/// Copies until the reader hits EOF, then half-closes the writer so the other direction
/// can still drain.
async fn copy_raw(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut buffer: PooledBuffer,
) -> Result<u64, Error> {
    let buffer = buffer.buffer_mut();
    let mut total = 0;

    loop {
        buffer.clear();
        if reader.read_buf(buffer).await? == 0 {
            let _ = writer.shutdown().await;
            return Ok(total);
        }
        writer.write_all(buffer).await?;
        total += buffer.len() as u64;
    }
}

async fn forward_commands(reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Result<u64, Error> {
    let mut commands = FramedRead::new(reader, ServerCodec::new());
    let mut upstream = FramedWrite::new(writer, ClientCodec::new());
    let mut total = 0;

    while let Some(command) = commands.next().await {
        let command = command?;
        debug!(%command, "forward");
        upstream.send(command).await?;
        total += 1;
    }

    let _ = upstream.get_mut().shutdown().await;
    Ok(total)
}

async fn forward_replies(reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Result<u64, Error> {
    let mut replies = FramedRead::new(reader, ClientCodec::new());
    let mut client = FramedWrite::new(writer, ServerCodec::new());
    let mut total = 0;

    while let Some(reply) = replies.next().await {
        client.send(reply?).await?;
        total += 1;
    }

    let _ = client.get_mut().shutdown().await;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode() {
        assert_eq!("raw".parse::<Mode>().unwrap(), Mode::Raw);
        assert_eq!("FRAMED".parse::<Mode>().unwrap(), Mode::Framed);
        assert!("bogus".parse::<Mode>().is_err());
        assert_eq!(Mode::Framed.to_string(), "framed");
    }

    #[test]
    fn buffers_return_to_pool() {
        let pool = Arc::new(BufferPool::new(64));
        assert_eq!(pool.available(), 0);

        let first = pool.get();
        let second = pool.get();
        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), 2);

        let mut reused = pool.get();
        reused.buffer_mut().extend_from_slice(b"leftover");
        assert_eq!(pool.available(), 1);
        drop(reused);

        let mut clean = pool.get();
        assert!(clean.buffer_mut().is_empty());
    }

    #[tokio::test]
    async fn upstream_down_is_reported() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream = closed.local_addr().unwrap().to_string();
        drop(closed);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (socket, client_address) = listener.accept().await.unwrap();
        let _client = client.await.unwrap();

        let config = Arc::new(Config {
            upstream,
            ..Config::default()
        });
        let result = relay(socket, client_address, config, Arc::new(BufferPool::new(64))).await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable { .. })));
    }
}
