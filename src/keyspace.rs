use std::sync::Arc;

use crate::pubsub::Broker;
use crate::store::{Store, StoreGuard};

/// One selectable logical database: its keys and its pub/sub subscriptions. Clones share
/// the same data.
#[derive(Clone)]
pub struct Keyspace {
    index: usize,
    store: Store,
    broker: Broker,
}

impl Keyspace {
    pub fn new(index: usize) -> Keyspace {
        Keyspace {
            index,
            store: Store::new(),
            broker: Broker::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Locks the keys for the duration of one command.
    pub fn lock(&self) -> StoreGuard<'_> {
        self.store.lock()
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }
}

/// The fixed set of keyspaces a server exposes, addressed by `SELECT` index.
#[derive(Clone)]
pub struct Keyspaces {
    spaces: Arc<[Keyspace]>,
}

impl Keyspaces {
    pub fn new(count: usize) -> Keyspaces {
        Keyspaces {
            spaces: (0..count.max(1)).map(Keyspace::new).collect(),
        }
    }

    /// Keyspace 0, where every connection starts. There is always at least one keyspace.
    pub fn first(&self) -> &Keyspace {
        &self.spaces[0]
    }

    pub fn get(&self, index: usize) -> Option<&Keyspace> {
        self.spaces.get(index)
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keyspace> {
        self.spaces.iter()
    }
}
