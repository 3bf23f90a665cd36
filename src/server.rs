use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument};

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::commands::server::{KeyspaceStats, ServerStats};
use crate::connection::Connection;
use crate::keyspace::Keyspaces;
use crate::monitor::Monitors;
use crate::session::Session;
use crate::Error;

pub const DEFAULT_PORT: u16 = 6379;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Number of selectable keyspaces.
    pub databases: usize,
    /// When set, every connection must `AUTH` before issuing other commands.
    pub password: Option<String>,
    /// Largest bulk string or array a client may send.
    pub max_frame_size: usize,
    /// Pushes (pub/sub messages, MONITOR lines) queued per connection before the
    /// connection is considered too slow and dropped.
    pub subscriber_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            databases: 16,
            password: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            subscriber_queue: 1024,
        }
    }
}

/// State shared by every connection of one server.
pub struct Context {
    pub config: Config,
    pub keyspaces: Keyspaces,
    pub monitors: Monitors,
    port: u16,
    next_client_id: AtomicU64,
    connected: AtomicUsize,
    started_at: Instant,
}

impl Context {
    pub fn new(config: Config, port: u16) -> Context {
        Context {
            keyspaces: Keyspaces::new(config.databases),
            monitors: Monitors::new(),
            config,
            port,
            next_client_id: AtomicU64::new(1),
            connected: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    fn register_client(&self) -> u64 {
        self.connected.fetch_add(1, Ordering::Relaxed);
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    fn unregister_client(&self) {
        self.connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ServerStats {
        let keyspaces = self
            .keyspaces
            .iter()
            .map(|db| {
                let mut store = db.lock();
                KeyspaceStats {
                    index: db.index(),
                    keys: store.size(),
                    expires: store.expiring(),
                }
            })
            .collect();

        ServerStats {
            port: self.port,
            uptime: self.started_at.elapsed(),
            connected_clients: self.connected.load(Ordering::Relaxed),
            total_connections_received: self.next_client_id.load(Ordering::Relaxed) - 1,
            monitors: self.monitors.len(),
            pubsub_channels: self.keyspaces.iter().map(|db| db.broker().channel_count()).sum(),
            pubsub_patterns: self.keyspaces.iter().map(|db| db.broker().pattern_count()).sum(),
            keyspaces,
        }
    }
}

/// Binds the configured address and serves connections until the listener fails.
pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

    serve(listener, config).await
}

/// Serves connections accepted from an already bound listener.
pub async fn serve(listener: TcpListener, config: Config) -> Result<(), Error> {
    let local_addr = listener.local_addr()?;
    let ctx = Arc::new(Context::new(config, local_addr.port()));

    info!(
        databases = ctx.keyspaces.len(),
        auth = ctx.config.password.is_some(),
        "redwire server listening on {}",
        local_addr
    );

    loop {
        let (socket, client_address) = listener.accept().await?;
        let ctx = ctx.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, ctx).await {
                error!(error = %e, "connection failed");
            }
        });
    }
}

#[instrument(
    name = "connection",
    skip(stream, ctx),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    ctx: Arc<Context>,
) -> Result<(), Error> {
    let _ = stream.set_nodelay(true);
    let conn = Connection::with_max_frame_size(stream, client_address, ctx.config.max_frame_size);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    let client_id = ctx.register_client();
    let result = Session::new(conn, client_id, ctx.clone()).run().await;
    ctx.unregister_client();

    info!("Connection closed");
    result
}
