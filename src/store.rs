use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration, Instant};

use crate::zset::SortedSet;

/// The Store is responsible for managing the keys of one logical database, with optional
/// time-to-live settings for each key. Expired keys are invisible as soon as their deadline
/// passes and are reclaimed by a background task that sleeps until the nearest deadline.
/// The store is thread-safe and cheap to clone.
///
/// Every command locks the store once and holds the guard for its whole execution, which is
/// what makes commands atomic with respect to each other.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let state = State {
            keys: HashMap::new(),
            ttls: BTreeSet::new(),
        };

        let waker = Arc::new(Notify::new());
        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
            waker: waker.clone(),
        });

        tokio::spawn({
            let inner = Arc::downgrade(&inner);
            async move { remove_expired_keys(inner, waker).await }
        });

        Self { inner }
    }

    /// Locks the store. A lock poisoned by a panicking command is recovered: every mutation
    /// leaves the maps consistent before it can panic.
    pub fn lock(&self) -> StoreGuard<'_> {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        StoreGuard {
            state,
            waker: &self.inner.waker,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

struct InnerStore {
    state: Mutex<State>,
    waker: Arc<Notify>,
}

impl Drop for InnerStore {
    fn drop(&mut self) {
        // Lets the expiry task observe that the store is gone.
        self.waker.notify_one();
    }
}

type Key = Bytes;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct State {
    keys: HashMap<Key, Entry>,
    ttls: BTreeSet<(Instant, Key)>,
}

/// The data a key can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    SortedSet(SortedSet),
}

impl Value {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::SortedSet(_) => "zset",
        }
    }

    /// Containers with no elements left. Strings are never empty in this sense.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
            Value::SortedSet(zset) => zset.is_empty(),
        }
    }
}

/// The key holds a value of another type than the one the command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

pub struct StoreGuard<'a> {
    state: MutexGuard<'a, State>,
    waker: &'a Notify,
}

macro_rules! typed_accessors {
    ($get:ident, $get_mut:ident, $entry:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&mut self, key: &[u8]) -> Result<Option<&$ty>, WrongType> {
            match self.get(key) {
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(WrongType),
                None => Ok(None),
            }
        }

        pub fn $get_mut(&mut self, key: &[u8]) -> Result<Option<&mut $ty>, WrongType> {
            match self.get_mut(key) {
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(WrongType),
                None => Ok(None),
            }
        }

        /// Returns the value stored at `key`, creating an empty one when the key is missing.
        pub fn $entry(&mut self, key: &Bytes) -> Result<&mut $ty, WrongType> {
            self.purge_if_expired(key);

            let entry = self.state.keys.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::$variant(Default::default()),
                expires_at: None,
            });

            match &mut entry.value {
                Value::$variant(inner) => Ok(inner),
                _ => Err(WrongType),
            }
        }
    };
}

impl<'a> StoreGuard<'a> {
    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.purge_if_expired(key);
        self.state.keys.get(key).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.purge_if_expired(key);
        self.state.keys.get_mut(key).map(|entry| &mut entry.value)
    }

    typed_accessors!(string, string_mut, string_entry, String, Bytes);
    typed_accessors!(list, list_mut, list_entry, List, VecDeque<Bytes>);
    typed_accessors!(members, set_mut, set_entry, Set, HashSet<Bytes>);
    typed_accessors!(hash, hash_mut, hash_entry, Hash, HashMap<Bytes, Bytes>);
    typed_accessors!(zset, zset_mut, zset_entry, SortedSet, SortedSet);

    /// Stores `value` at `key`, discarding any previous value and its time to live.
    pub fn set(&mut self, key: Bytes, value: Value) {
        self.clear_ttl(&key);
        self.state.keys.insert(
            key,
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Replaces the value at `key` and keeps its time to live.
    pub fn replace(&mut self, key: Bytes, value: Value) {
        self.purge_if_expired(&key);
        match self.state.keys.get_mut(&key) {
            Some(entry) => entry.value = value,
            None => self.set(key, value),
        }
    }

    pub fn set_with_ttl(&mut self, key: Key, value: Value, ttl: Duration) {
        self.set(key.clone(), value);
        self.expire(&key, ttl);
    }

    /// Sets a time to live on an existing key. Returns false when the key does not exist.
    pub fn expire(&mut self, key: &[u8], ttl: Duration) -> bool {
        self.purge_if_expired(key);
        let Some((key, entry)) = self.state.keys.get_key_value(key) else {
            return false;
        };
        let key = key.clone();
        let previous = entry.expires_at;
        let expires_at = Instant::now() + ttl;

        if let Some(previous) = previous {
            self.state.ttls.remove(&(previous, key.clone()));
        }
        if let Some(entry) = self.state.keys.get_mut(&key) {
            entry.expires_at = Some(expires_at);
        }
        self.state.ttls.insert((expires_at, key.clone()));

        let next_to_expire = self.state.ttls.iter().next().map(|(_, key)| key);
        let expires_next = next_to_expire == Some(&key);
        if expires_next {
            self.waker.notify_one();
        }

        true
    }

    /// Removes the time to live of `key`. Returns false when the key does not exist or has
    /// no time to live.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.purge_if_expired(key);
        self.clear_ttl(key)
    }

    /// `None` when the key does not exist, `Some(None)` when it never expires.
    pub fn ttl(&mut self, key: &[u8]) -> Option<Option<Duration>> {
        self.purge_if_expired(key);
        let now = Instant::now();
        self.state
            .keys
            .get(key)
            .map(|entry| entry.expires_at.map(|at| at.saturating_duration_since(now)))
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.purge_if_expired(key);
        self.clear_ttl(key);
        self.state.keys.remove(key).map(|entry| entry.value)
    }

    /// Drops `key` if it holds a container whose last element is gone.
    pub fn remove_if_empty(&mut self, key: &[u8]) {
        let empty = self
            .state
            .keys
            .get(key)
            .is_some_and(|entry| entry.value.is_empty_container());

        if empty {
            self.remove(key);
        }
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn size(&mut self) -> usize {
        self.remove_expired_keys();
        self.state.keys.len()
    }

    pub fn keys(&mut self) -> impl Iterator<Item = &Bytes> {
        self.remove_expired_keys();
        self.state.keys.keys()
    }

    /// Number of keys carrying a time to live.
    pub fn expiring(&mut self) -> usize {
        self.remove_expired_keys();
        self.state.ttls.len()
    }

    pub fn clear(&mut self) {
        self.state.keys.clear();
        self.state.ttls.clear();
    }

    /// Removes every key whose deadline has passed and returns the next deadline.
    pub fn remove_expired_keys(&mut self) -> Option<Instant> {
        let now = Instant::now();

        let expired_keys: Vec<(Instant, Key)> = self
            .state
            .ttls
            .iter()
            .take_while(|(expires_at, _)| expires_at <= &now)
            .cloned()
            .collect();

        for (when, key) in expired_keys {
            self.state.keys.remove(&key);
            self.state.ttls.remove(&(when, key));
        }

        self.state
            .ttls
            .iter()
            .next()
            .map(|&(expires_at, _)| expires_at)
    }

    fn purge_if_expired(&mut self, key: &[u8]) {
        let now = Instant::now();
        let expired = self
            .state
            .keys
            .get(key)
            .is_some_and(|entry| entry.is_expired(now));

        if expired {
            self.clear_ttl(key);
            self.state.keys.remove(key);
        }
    }

    fn clear_ttl(&mut self, key: &[u8]) -> bool {
        let Some((key, entry)) = self.state.keys.get_key_value(key) else {
            return false;
        };
        let Some(expires_at) = entry.expires_at else {
            return false;
        };
        let key = key.clone();

        self.state.ttls.remove(&(expires_at, key.clone()));
        if let Some(entry) = self.state.keys.get_mut(&key) {
            entry.expires_at = None;
        }
        true
    }
}

async fn remove_expired_keys(store: Weak<InnerStore>, waker: Arc<Notify>) {
    loop {
        let next_expiration = {
            let Some(inner) = store.upgrade() else {
                return;
            };
            let store = Store { inner };
            let next_expiration = store.lock().remove_expired_keys();
            next_expiration
        };

        if let Some(next_expiration) = next_expiration {
            tokio::select! {
                _ = sleep_until(next_expiration) => {}
                _ = waker.notified() => {}
            }
        } else {
            waker.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;
    use tokio::time::Duration;

    fn string(value: &'static str) -> Value {
        Value::String(Bytes::from(value))
    }

    #[tokio::test]
    async fn ttl() {
        time::pause();

        let store = Store::new();

        {
            let mut store = store.lock();

            store.set_with_ttl(
                Bytes::from("key1"),
                string("value1"),
                Duration::from_secs(10),
            );

            store.set_with_ttl(
                Bytes::from("key2"),
                string("value2"),
                Duration::from_secs(20),
            );
        }

        assert_eq!(store.lock().size(), 2);

        time::advance(Duration::from_secs(10)).await;
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(store.lock().size(), 1);
        assert!(store.lock().exists(b"key2"));

        time::advance(Duration::from_secs(20)).await;
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.lock().size(), 0);

        {
            let mut store = store.lock();

            store.set_with_ttl(
                Bytes::from("key3"),
                string("value3"),
                Duration::from_secs(20),
            );
        }

        assert_eq!(store.lock().size(), 1);

        time::advance(Duration::from_secs(20)).await;
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.lock().size(), 0);
    }

    #[tokio::test]
    async fn set_clears_ttl() {
        time::pause();

        let store = Store::new();
        let mut guard = store.lock();

        guard.set_with_ttl(Bytes::from("k"), string("v"), Duration::from_secs(5));
        assert!(guard.ttl(b"k").unwrap().is_some());

        guard.set(Bytes::from("k"), string("w"));
        assert_eq!(guard.ttl(b"k"), Some(None));
        assert_eq!(guard.ttl(b"missing"), None);
    }

    #[tokio::test]
    async fn persist_removes_deadline() {
        time::pause();

        let store = Store::new();
        {
            let mut guard = store.lock();
            guard.set_with_ttl(Bytes::from("k"), string("v"), Duration::from_secs(1));
            assert!(guard.persist(b"k"));
            assert!(!guard.persist(b"k"));
        }

        time::advance(Duration::from_secs(2)).await;
        time::sleep(Duration::from_millis(1)).await;
        assert!(store.lock().exists(b"k"));
    }

    #[tokio::test]
    async fn typed_accessors_report_wrong_type() {
        let store = Store::new();
        let mut guard = store.lock();

        guard.set(Bytes::from("s"), string("v"));

        assert_eq!(guard.list(b"s"), Err(WrongType));
        assert_eq!(guard.string(b"s"), Ok(Some(&Bytes::from("v"))));
        assert_eq!(guard.string(b"nope"), Ok(None));
        assert!(guard.hash_entry(&Bytes::from("s")).is_err());
        assert_eq!(guard.members(b"s"), Err(WrongType));

        guard.set_entry(&Bytes::from("m")).unwrap().insert(Bytes::from("a"));
        assert_eq!(guard.members(b"m").unwrap().map(|set| set.len()), Some(1));

        // Storing a plain value over a set replaces it.
        guard.set(Bytes::from("m"), string("w"));
        assert_eq!(guard.members(b"m"), Err(WrongType));
    }

    #[tokio::test]
    async fn empty_containers_are_removed() {
        let store = Store::new();
        let mut guard = store.lock();
        let key = Bytes::from("l");

        guard.list_entry(&key).unwrap().push_back(Bytes::from("a"));
        guard.list_mut(&key).unwrap().unwrap().pop_front();
        guard.remove_if_empty(&key);

        assert!(!guard.exists(&key));
    }
}
