//! Clients for a RESP server.
//!
//! [`Client`] multiplexes any number of concurrent callers over one connection. Commands
//! are written in the order they are submitted and every reply resolves the oldest
//! request still waiting, so replies can never be handed to the wrong caller.
//! [`blocking::Client`] does the same over a std socket without a runtime, and
//! [`Subscriber`] is a connection dedicated to pub/sub.

pub mod blocking;
pub mod subscriber;

pub use subscriber::{Push, Subscriber};

use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use thiserror::Error as ThisError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::codec::{self, ClientCodec};
use crate::command::Command;
use crate::reply::Reply;

/// Requests that may be written but not yet answered before `submit` waits.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

// Upper bound on the number of queued commands coalesced into a single write.
const MAX_BATCH: usize = 256;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The connection is gone; the request may or may not have reached the server.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(Reply),
}

/// A caller waiting for its reply. Holding the permit keeps the request counted as in
/// flight until the reply is delivered or the connection fails.
struct Waiter {
    tx: oneshot::Sender<Result<Reply, Error>>,
    _permit: OwnedSemaphorePermit,
}

impl Waiter {
    fn fail(self, reason: &str) {
        let _ = self.tx.send(Err(Error::ConnectionClosed(reason.to_string())));
    }
}

/// Waiters in write order. Once closed, nothing else is admitted.
#[derive(Default)]
struct Queue {
    waiting: VecDeque<Waiter>,
    closed: Option<String>,
}

struct Shared {
    queue: Mutex<Queue>,
    in_flight: Arc<Semaphore>,
    token: CancellationToken,
}

impl Shared {
    fn queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a waiter, failing it right away when the connection already closed.
    fn enqueue(&self, waiter: Waiter) -> bool {
        let mut queue = self.queue();
        match &queue.closed {
            Some(reason) => {
                let reason = reason.clone();
                drop(queue);
                waiter.fail(&reason);
                false
            }
            None => {
                queue.waiting.push_back(waiter);
                true
            }
        }
    }

    fn pop(&self) -> Option<Waiter> {
        self.queue().waiting.pop_front()
    }

    /// Tears the connection down and fails every waiter. Only the first reason sticks.
    fn close(&self, reason: String) {
        self.token.cancel();
        self.in_flight.close();

        let waiting = {
            let mut queue = self.queue();
            if queue.closed.is_none() {
                debug!(%reason, "client connection closed");
                queue.closed = Some(reason);
            }
            std::mem::take(&mut queue.waiting)
        };

        let reason = self.closed_reason();
        for waiter in waiting {
            waiter.fail(&reason);
        }
    }

    fn closed_reason(&self) -> String {
        self.queue()
            .closed
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    }
}

struct Request {
    command: Command,
    waiter: Waiter,
}

/// A pipelining client. Cloning is cheap; all clones share the same connection, which is
/// closed once the last clone is dropped or [`Client::close`] is called.
///
/// ```no_run
/// # async fn demo() -> Result<(), redwire::client::Error> {
/// use redwire::client::Client;
/// use redwire::command::Command;
///
/// let client = Client::connect("127.0.0.1:6379").await?;
/// let set = client.submit(Command::new("SET").arg("k").arg("v")).await?;
/// let get = client.submit(Command::new("GET").arg("k")).await?;
/// assert_eq!(set.await?, redwire::reply::Reply::ok());
/// println!("{}", get.await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    requests: mpsc::UnboundedSender<Request>,
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Client, Error> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Client::new(stream, DEFAULT_MAX_IN_FLIGHT))
    }

    /// Wraps an established connection. Must be called from within a tokio runtime: the
    /// reader and writer run as tasks.
    pub fn new<T>(io: T, max_in_flight: usize) -> Client
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let token = CancellationToken::new();
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            token: token.clone(),
        });
        let (requests, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            FramedWrite::new(write_half, ClientCodec::new()),
            rx,
            shared.clone(),
        ));
        tokio::spawn(read_loop(
            FramedRead::new(read_half, ClientCodec::new()),
            shared.clone(),
        ));

        Client {
            requests,
            shared,
            _guard: Arc::new(token.drop_guard()),
        }
    }

    /// Queues `command` for writing and returns a handle resolving to its reply. Waits
    /// only when the in-flight limit is reached.
    pub async fn submit(&self, command: Command) -> Result<ReplyHandle, Error> {
        let permit = self
            .shared
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ConnectionClosed(self.shared.closed_reason()))?;

        let (tx, rx) = oneshot::channel();
        let request = Request {
            command,
            waiter: Waiter {
                tx,
                _permit: permit,
            },
        };

        self.requests
            .send(request)
            .map_err(|_| Error::ConnectionClosed(self.shared.closed_reason()))?;

        Ok(ReplyHandle { rx })
    }

    /// Submits `command` and waits for its reply. Error replies are returned as
    /// [`Reply::Error`] values, not as `Err`.
    pub async fn execute(&self, command: Command) -> Result<Reply, Error> {
        self.submit(command).await?.await
    }

    /// Submits every command before waiting for the first reply.
    pub async fn pipeline(
        &self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<Reply>, Error> {
        let mut handles = vec![];
        for command in commands {
            handles.push(self.submit(command).await?);
        }

        let mut replies = Vec::with_capacity(handles.len());
        for handle in handles {
            replies.push(handle.await?);
        }
        Ok(replies)
    }

    /// Closes the connection. Requests still waiting fail with
    /// [`Error::ConnectionClosed`].
    pub fn close(&self) {
        self.shared.close("connection closed by client".to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }
}

/// Resolves to the reply of one submitted command.
#[must_use = "a reply handle does nothing unless awaited"]
pub struct ReplyHandle {
    rx: oneshot::Receiver<Result<Reply, Error>>,
}

impl Future for ReplyHandle {
    type Output = Result<Reply, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(Error::ConnectionClosed("request dropped".to_string())))
        })
    }
}

async fn write_loop<W>(
    mut writer: FramedWrite<W, ClientCodec>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            _ = shared.token.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // Everything already submitted goes out in one write.
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match requests.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }

        let mut result = Ok(());
        for Request { command, waiter } in batch {
            // The waiter is queued before its bytes are written, so it is always in
            // place by the time the reply can arrive.
            if !shared.enqueue(waiter) {
                continue;
            }
            if let Err(e) = writer.feed(command).await {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = SinkExt::<Command>::flush(&mut writer).await;
        }

        if let Err(e) = result {
            warn!(error = %e, "failed to write to server");
            shared.close(e.to_string());
            break;
        }
    }

    requests.close();
    let reason = shared.closed_reason();
    while let Ok(request) = requests.try_recv() {
        request.waiter.fail(&reason);
    }
}

async fn read_loop<R>(mut reader: FramedRead<R, ClientCodec>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let next = tokio::select! {
            _ = shared.token.cancelled() => break "connection closed by client".to_string(),
            next = reader.next() => next,
        };

        match next {
            Some(Ok(reply)) => match shared.pop() {
                Some(waiter) => {
                    let _ = waiter.tx.send(Ok(reply));
                }
                None => break format!("reply without a pending request: {}", reply),
            },
            Some(Err(e)) => {
                warn!(error = %e, "failed to decode reply");
                break e.to_string();
            }
            None => break "connection closed by server".to_string(),
        }
    };

    shared.close(reason);
}
