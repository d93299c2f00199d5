//! Cancellable standing subscriptions.
//!
//! Every live query hands its owner a [`Snapshots`] handle: a stream of
//! whole-snapshot replacements plus the disposer for the task feeding it.
//! Dropping the handle (or the bare [`Subscription`]) tears the feed down,
//! so an owner that goes away cannot keep receiving updates.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Disposer for a background feed task. Aborts the task when disposed or
/// dropped.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F>(fut: F) -> Self
    where F: Future<Output = ()> + Send + 'static {
        Self {
            handle: tokio::spawn(fut),
        }
    }

    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) { self.handle.abort(); }
}

/// Receiving end of a standing subscription. Each item is a full snapshot
/// replacing the previous one; snapshots are never merged.
#[derive(Debug)]
pub struct Snapshots<T> {
    rx: mpsc::UnboundedReceiver<T>,
    _sub: Subscription,
}

impl<T: Send + 'static> Snapshots<T> {
    /// Builds a snapshot stream from a producer task. The producer gets the
    /// sending half and runs until aborted or until it returns.
    pub fn produce<F, Fut>(f: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedSender<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            _sub: Subscription::spawn(f(tx)),
        }
    }

    /// Next snapshot, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<T> { self.rx.recv().await }

    /// Non-blocking variant for callers draining at their own pace.
    pub fn try_recv(&mut self) -> Option<T> { self.rx.try_recv().ok() }
}

/// Holds at most one subscription per key. Replacing a key disposes the
/// subscription it previously held, so changing a dependency (active
/// identity, open community) cannot leak the old feed.
#[derive(Debug, Default)]
pub struct SubscriptionArena<K: Eq + Hash> {
    subs: HashMap<K, Subscription>,
}

impl<K: Eq + Hash> SubscriptionArena<K> {
    pub fn new() -> Self {
        Self {
            subs: HashMap::new(),
        }
    }

    pub fn put(&mut self, key: K, sub: Subscription) {
        if let Some(old) = self.subs.insert(key, sub) {
            old.dispose();
        }
    }

    pub fn remove(&mut self, key: &K) {
        if let Some(old) = self.subs.remove(key) {
            old.dispose();
        }
    }

    pub fn clear(&mut self) { self.subs.clear(); }

    pub fn len(&self) -> usize { self.subs.len() }

    pub fn is_empty(&self) -> bool { self.subs.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshots_deliver_in_order_then_close() {
        let mut snaps = Snapshots::produce(|tx| async move {
            for i in 0..3 {
                tx.send(i).unwrap();
            }
        });

        assert_eq!(snaps.recv().await, Some(0));
        assert_eq!(snaps.recv().await, Some(1));
        assert_eq!(snaps.recv().await, Some(2));
        assert_eq!(snaps.recv().await, None);
    }

    #[tokio::test]
    async fn arena_replaces_and_disposes_per_key() {
        let mut arena = SubscriptionArena::new();

        arena.put("a", Subscription::spawn(std::future::pending()));
        arena.put("a", Subscription::spawn(std::future::pending()));
        assert_eq!(arena.len(), 1);

        arena.remove(&"a");
        assert!(arena.is_empty());
    }
}
