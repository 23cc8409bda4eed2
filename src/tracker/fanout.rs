//! Best-effort broadcast of match snapshots to streaming subscribers.
//!
//! Each subscriber owns a bounded queue. Broadcasting never waits on a
//! subscriber: a queue that is full or whose receiver is gone is dropped
//! from the registry during the same broadcast.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::models::MatchSnapshot;

pub type SubscriberId = u64;

/// Registry of live subscriber channels.
#[derive(Clone)]
pub struct SubscriberFanout {
    inner: Arc<FanoutInner>,
}

struct FanoutInner {
    channels: DashMap<SubscriberId, mpsc::Sender<Arc<MatchSnapshot>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl FanoutInner {
    fn unregister(&self, id: SubscriberId) -> bool {
        self.channels.remove(&id).is_some()
    }
}

impl SubscriberFanout {
    /// `buffer` is the queue depth per subscriber.
    pub fn new(buffer: usize) -> Self {
        SubscriberFanout {
            inner: Arc::new(FanoutInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Open a new channel; it is part of the active set immediately.
    pub fn register(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.channels.insert(id, tx);
        debug!("Subscriber {} registered ({} active)", id, self.len());
        Subscription {
            id,
            rx,
            pending: None,
            fanout: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a channel. Returns false if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.inner.unregister(id)
    }

    /// Deliver `snapshot` to every active channel without blocking.
    /// Channels that cannot take it are removed. Returns the number of
    /// successful deliveries.
    pub fn broadcast(&self, snapshot: Arc<MatchSnapshot>) -> usize {
        let mut delivered = 0;
        let mut dead: Vec<SubscriberId> = Vec::new();

        for entry in self.inner.channels.iter() {
            match entry.value().try_send(Arc::clone(&snapshot)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Subscriber {} queue full, dropping it", entry.key());
                    dead.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }

        for id in dead {
            self.inner.unregister(id);
        }
        delivered
    }

    /// Number of active channels.
    pub fn len(&self) -> usize {
        self.inner.channels.len()
    }
}

/// What a subscriber should emit next.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Snapshot(Arc<MatchSnapshot>),
    /// Nothing arrived within the wait; keeps idle proxies from closing the stream
    Keepalive,
}

/// One subscriber's end of the fanout. Dropping it unregisters the channel.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<MatchSnapshot>>,
    pending: Option<Arc<MatchSnapshot>>,
    fanout: Weak<FanoutInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Queue the snapshot that existed when the subscriber connected; it is
    /// handed out before anything broadcast later.
    pub fn prime(&mut self, snapshot: Arc<MatchSnapshot>) {
        self.pending = Some(snapshot);
    }

    /// Next snapshot, or `None` once the channel has been removed from the
    /// fanout.
    pub async fn recv(&mut self) -> Option<Arc<MatchSnapshot>> {
        if let Some(snapshot) = self.pending.take() {
            return Some(snapshot);
        }
        self.rx.recv().await
    }

    /// Like [`recv`](Self::recv), but yields [`Delivery::Keepalive`] after
    /// `keepalive` of silence.
    pub async fn next_delivery(&mut self, keepalive: Duration) -> Option<Delivery> {
        match tokio::time::timeout(keepalive, self.recv()).await {
            Ok(Some(snapshot)) => Some(Delivery::Snapshot(snapshot)),
            Ok(None) => None,
            Err(_) => Some(Delivery::Keepalive),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.fanout.upgrade() {
            if inner.unregister(self.id) {
                debug!("Subscriber {} disconnected", self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(title: &str) -> Arc<MatchSnapshot> {
        Arc::new(MatchSnapshot::placeholder(title, Utc::now()))
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let fanout = SubscriberFanout::new(4);
        let mut a = fanout.register();
        let mut b = fanout.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(fanout.len(), 2);

        assert_eq!(fanout.broadcast(snap("one")), 2);
        assert_eq!(a.recv().await.unwrap().raw_title, "one");
        assert_eq!(b.recv().await.unwrap().raw_title, "one");
    }

    #[tokio::test]
    async fn test_full_queue_is_pruned_others_still_served() {
        let fanout = SubscriberFanout::new(1);
        let mut fast = fanout.register();
        let mut slow = fanout.register();

        assert_eq!(fanout.broadcast(snap("one")), 2);
        assert_eq!(fast.recv().await.unwrap().raw_title, "one");

        // slow never drained "one", so "two" does not fit
        assert_eq!(fanout.broadcast(snap("two")), 1);
        assert_eq!(fanout.len(), 1);
        assert_eq!(fast.recv().await.unwrap().raw_title, "two");

        assert_eq!(slow.recv().await.unwrap().raw_title, "one");
        assert!(slow.recv().await.is_none(), "pruned channel should close");
    }

    #[tokio::test]
    async fn test_closed_channel_is_pruned() {
        let fanout = SubscriberFanout::new(4);
        let mut live = fanout.register();

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        fanout.inner.channels.insert(999, tx);
        assert_eq!(fanout.len(), 2);

        assert_eq!(fanout.broadcast(snap("x")), 1);
        assert_eq!(fanout.len(), 1);
        assert!(!fanout.unregister(999));
        assert_eq!(live.recv().await.unwrap().raw_title, "x");
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let fanout = SubscriberFanout::new(4);
        let sub = fanout.register();
        assert!(fanout.unregister(sub.id()));
        assert!(!fanout.unregister(sub.id()));
        assert_eq!(fanout.len(), 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let fanout = SubscriberFanout::new(4);
        let sub = fanout.register();
        assert_eq!(fanout.len(), 1);
        drop(sub);
        assert_eq!(fanout.len(), 0);
    }

    #[tokio::test]
    async fn test_primed_snapshot_comes_first() {
        let fanout = SubscriberFanout::new(4);
        let mut sub = fanout.register();
        sub.prime(snap("current"));
        fanout.broadcast(snap("next"));

        assert_eq!(sub.recv().await.unwrap().raw_title, "current");
        assert_eq!(sub.recv().await.unwrap().raw_title, "next");
    }

    #[tokio::test]
    async fn test_keepalive_when_idle() {
        let fanout = SubscriberFanout::new(4);
        let mut sub = fanout.register();

        let delivery = sub.next_delivery(Duration::from_millis(20)).await;
        assert_eq!(delivery, Some(Delivery::Keepalive));
        assert_eq!(fanout.len(), 1, "idle subscriber must not be dropped");

        let s = snap("after idle");
        fanout.broadcast(Arc::clone(&s));
        let delivery = sub.next_delivery(Duration::from_secs(5)).await;
        assert_eq!(delivery, Some(Delivery::Snapshot(s)));
    }
}
