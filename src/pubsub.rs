use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pattern::Pattern;
use crate::reply::Reply;

/// The receiving end of a subscription: a bounded queue drained by the subscriber's
/// connection, and a token that tears that connection down.
///
/// Publishing never waits on a subscriber. When the queue is full the subscriber is
/// considered too slow and is disconnected through `kill`.
#[derive(Clone, Debug)]
pub struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<Reply>,
    kill: CancellationToken,
}

impl Subscriber {
    pub fn new(id: Uuid, tx: mpsc::Sender<Reply>, kill: CancellationToken) -> Subscriber {
        Subscriber { id, tx, kill }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Another handle on the push queue, for pushes that are not pub/sub messages.
    pub fn sender(&self) -> mpsc::Sender<Reply> {
        self.tx.clone()
    }

    /// Queues `push` without waiting. Returns false when the subscriber is gone or was just
    /// evicted.
    fn deliver(&self, push: Reply) -> bool {
        match self.tx.try_send(push) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %self.id, "push queue full, disconnecting slow subscriber");
                self.kill.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

struct PatternSubscribers {
    pattern: Pattern,
    subscribers: HashMap<Uuid, Subscriber>,
}

#[derive(Default)]
struct Registry {
    channels: HashMap<Bytes, HashMap<Uuid, Subscriber>>,
    patterns: HashMap<Bytes, PatternSubscribers>,
}

/// Exact-channel and pattern subscriptions of one keyspace.
///
/// Both maps live behind a single mutex. `publish` holds it only while queueing, it never
/// awaits.
#[derive(Clone, Default)]
pub struct Broker {
    registry: Arc<Mutex<Registry>>,
}

impl Broker {
    pub fn new() -> Broker {
        Broker::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, channel: Bytes, subscriber: &Subscriber) {
        self.registry()
            .channels
            .entry(channel)
            .or_default()
            .insert(subscriber.id, subscriber.clone());
    }

    pub fn unsubscribe(&self, channel: &[u8], id: Uuid) {
        let mut registry = self.registry();
        if let Some(subscribers) = registry.channels.get_mut(channel) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                registry.channels.remove(channel);
            }
        }
    }

    /// Registers interest in every channel matching `pattern`. The pattern is compiled here,
    /// once, and reused by every publish.
    pub fn psubscribe(&self, pattern: Bytes, subscriber: &Subscriber) {
        self.registry()
            .patterns
            .entry(pattern.clone())
            .or_insert_with(|| PatternSubscribers {
                pattern: Pattern::compile(pattern),
                subscribers: HashMap::new(),
            })
            .subscribers
            .insert(subscriber.id, subscriber.clone());
    }

    pub fn punsubscribe(&self, pattern: &[u8], id: Uuid) {
        let mut registry = self.registry();
        if let Some(entry) = registry.patterns.get_mut(pattern) {
            entry.subscribers.remove(&id);
            if entry.subscribers.is_empty() {
                registry.patterns.remove(pattern);
            }
        }
    }

    /// Delivers `payload` to every exact subscriber of `channel` and every pattern subscriber
    /// whose pattern matches it. Returns the number of deliveries.
    pub fn publish(&self, channel: &Bytes, payload: &Bytes) -> usize {
        let mut registry = self.registry();
        let mut delivered = 0;
        let mut dead: Vec<(Option<Bytes>, Uuid)> = vec![];

        if let Some(subscribers) = registry.channels.get(channel) {
            for subscriber in subscribers.values() {
                let push = Reply::array([
                    Reply::bulk("message"),
                    Reply::bulk(channel.clone()),
                    Reply::bulk(payload.clone()),
                ]);

                if subscriber.deliver(push) {
                    delivered += 1;
                } else {
                    dead.push((None, subscriber.id));
                }
            }
        }

        for (source, entry) in registry.patterns.iter() {
            if !entry.pattern.matches(channel) {
                continue;
            }

            for subscriber in entry.subscribers.values() {
                let push = Reply::array([
                    Reply::bulk("pmessage"),
                    Reply::bulk(source.clone()),
                    Reply::bulk(channel.clone()),
                    Reply::bulk(payload.clone()),
                ]);

                if subscriber.deliver(push) {
                    delivered += 1;
                } else {
                    dead.push((Some(source.clone()), subscriber.id));
                }
            }
        }

        for (pattern, id) in dead {
            debug!(subscriber = %id, "dropping unreachable subscriber");
            match pattern {
                None => {
                    if let Some(subscribers) = registry.channels.get_mut(channel) {
                        subscribers.remove(&id);
                    }
                }
                Some(pattern) => {
                    if let Some(entry) = registry.patterns.get_mut(&pattern) {
                        entry.subscribers.remove(&id);
                    }
                }
            }
        }
        registry.channels.retain(|_, subscribers| !subscribers.is_empty());
        registry.patterns.retain(|_, entry| !entry.subscribers.is_empty());

        delivered
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.registry().channels.len()
    }

    /// Number of distinct patterns with at least one subscriber.
    pub fn pattern_count(&self) -> usize {
        self.registry().patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(capacity: usize) -> (Subscriber, mpsc::Receiver<Reply>, CancellationToken) {
        let (tx, rx) = mpsc::channel(capacity);
        let kill = CancellationToken::new();
        (Subscriber::new(Uuid::new_v4(), tx, kill.clone()), rx, kill)
    }

    fn message(channel: &'static str, payload: &'static str) -> Reply {
        Reply::array([
            Reply::bulk("message"),
            Reply::bulk(channel),
            Reply::bulk(payload),
        ])
    }

    #[test]
    fn exact_and_pattern_subscribers_receive_once() {
        let broker = Broker::new();
        let (exact, mut exact_rx, _) = subscriber(8);
        let (pattern, mut pattern_rx, _) = subscriber(8);
        let (other, mut other_rx, _) = subscriber(8);

        broker.subscribe(Bytes::from("news.sport"), &exact);
        broker.psubscribe(Bytes::from("news.*"), &pattern);
        broker.subscribe(Bytes::from("weather"), &other);

        let delivered = broker.publish(&Bytes::from("news.sport"), &Bytes::from("goal"));

        assert_eq!(delivered, 2);
        assert_eq!(exact_rx.try_recv().unwrap(), message("news.sport", "goal"));
        assert_eq!(
            pattern_rx.try_recv().unwrap(),
            Reply::array([
                Reply::bulk("pmessage"),
                Reply::bulk("news.*"),
                Reply::bulk("news.sport"),
                Reply::bulk("goal"),
            ])
        );
        assert!(exact_rx.try_recv().is_err());
        assert!(pattern_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn subscribing_twice_delivers_once() {
        let broker = Broker::new();
        let (sub, mut rx, _) = subscriber(8);

        broker.subscribe(Bytes::from("c"), &sub);
        broker.subscribe(Bytes::from("c"), &sub);

        assert_eq!(broker.publish(&Bytes::from("c"), &Bytes::from("m")), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribed_listeners_receive_nothing() {
        let broker = Broker::new();
        let (sub, mut rx, _) = subscriber(8);

        broker.subscribe(Bytes::from("c"), &sub);
        broker.psubscribe(Bytes::from("*"), &sub);
        broker.unsubscribe(b"c", sub.id());
        broker.punsubscribe(b"*", sub.id());

        assert_eq!(broker.publish(&Bytes::from("c"), &Bytes::from("m")), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.channel_count(), 0);
        assert_eq!(broker.pattern_count(), 0);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let broker = Broker::new();
        let (sub, rx, _) = subscriber(8);

        broker.subscribe(Bytes::from("c"), &sub);
        drop(rx);

        assert_eq!(broker.publish(&Bytes::from("c"), &Bytes::from("m")), 0);
        assert_eq!(broker.channel_count(), 0);
    }

    #[test]
    fn full_queue_disconnects_slow_subscriber() {
        let broker = Broker::new();
        let (slow, _rx, kill) = subscriber(1);

        broker.subscribe(Bytes::from("c"), &slow);

        assert_eq!(broker.publish(&Bytes::from("c"), &Bytes::from("1")), 1);
        assert!(!kill.is_cancelled());

        assert_eq!(broker.publish(&Bytes::from("c"), &Bytes::from("2")), 0);
        assert!(kill.is_cancelled());
        assert_eq!(broker.channel_count(), 0);
    }
}
