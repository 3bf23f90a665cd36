use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::command::Command;
use crate::reply::Reply;

/// Connections in MONITOR mode. Every command executed elsewhere is echoed to them as a
/// status line such as `1718000000.123456 [0 127.0.0.1:50000] "SET" "k" "v"`.
///
/// Echoes use the same bounded push queue as pub/sub messages; a monitor that cannot keep
/// up misses lines rather than slowing down the server.
#[derive(Clone, Default)]
pub struct Monitors {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    // Lets the common no-monitor case skip formatting and locking.
    count: AtomicUsize,
    sinks: Mutex<HashMap<Uuid, mpsc::Sender<Reply>>>,
}

impl Monitors {
    pub fn new() -> Monitors {
        Monitors::default()
    }

    fn sinks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Reply>>> {
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: Uuid, tx: mpsc::Sender<Reply>) {
        let mut sinks = self.sinks();
        sinks.insert(id, tx);
        self.inner.count.store(sinks.len(), Ordering::Release);
    }

    pub fn unregister(&self, id: Uuid) {
        let mut sinks = self.sinks();
        sinks.remove(&id);
        self.inner.count.store(sinks.len(), Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn echo(&self, db: usize, addr: SocketAddr, command: &Command) {
        if self.is_empty() {
            return;
        }

        let line = format_line(SystemTime::now(), db, addr, command);
        let mut sinks = self.sinks();
        sinks.retain(|_, tx| match tx.try_send(Reply::Status(line.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        self.inner.count.store(sinks.len(), Ordering::Release);
    }
}

fn format_line(now: SystemTime, db: usize, addr: SocketAddr, command: &Command) -> String {
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!(
        "{}.{:06} [{} {}] {}",
        since_epoch.as_secs(),
        since_epoch.subsec_micros(),
        db,
        addr,
        command
    )
}
