//! Shared-store contract.
//!
//! The shared store is the only integration point between participants: a
//! peer roster, one expiring state record per peer, one inbound action queue
//! per peer, and a broadcast channel. Transports implement [`SharedStore`];
//! [`MemoryStore`] is the in-process implementation used by tests and the
//! demo binary.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{broadcast, Mutex},
    time::Instant,
};
use tracing::{debug, warn};

use crate::net::{PeerId, StateFields};

/// Broadcast backlog before slow subscribers start skipping records.
const CHANNEL_CAPACITY: usize = 256;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("shared store unavailable")]
    Unavailable,
    #[error("malformed field `{field}`: {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Live feed of raw records published on the broadcast channel.
///
/// Delivery is at-most-once: nothing published before `subscribe` is
/// replayed, and a subscriber that falls too far behind skips records.
pub struct EventSubscription {
    rx: broadcast::Receiver<String>,
}

impl EventSubscription {
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Drains everything delivered so far without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(raw) => out.push(raw),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, records dropped");
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
        out
    }
}

/// Abstract key-value + publish/subscribe service.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Adds a peer to the online roster.
    async fn add_peer(&self, peer: &PeerId) -> StoreResult<()>;
    async fn remove_peer(&self, peer: &PeerId) -> StoreResult<()>;
    /// Current roster ("who is online").
    async fn roster(&self) -> StoreResult<Vec<PeerId>>;

    /// Merges `fields` into the peer's state record and renews its expiry.
    async fn write_state(&self, peer: &PeerId, fields: StateFields, ttl: Duration)
        -> StoreResult<()>;
    /// Reads the peer's state record; expired records read as absent.
    async fn read_state(&self, peer: &PeerId) -> StoreResult<Option<StateFields>>;
    async fn delete_state(&self, peer: &PeerId) -> StoreResult<()>;

    /// Appends a raw record to the peer's inbound queue.
    async fn push_event(&self, peer: &PeerId, raw: String) -> StoreResult<()>;
    /// Pops the oldest record of the peer's inbound queue.
    async fn pop_event(&self, peer: &PeerId) -> StoreResult<Option<String>>;
    /// Reads the whole inbound queue without consuming it.
    async fn events(&self, peer: &PeerId) -> StoreResult<Vec<String>>;
    async fn delete_events(&self, peer: &PeerId) -> StoreResult<()>;

    /// Publishes to every current subscriber; returns how many received it.
    async fn publish(&self, raw: String) -> StoreResult<usize>;
    async fn subscribe(&self) -> StoreResult<EventSubscription>;
}

struct StateRecord {
    fields: StateFields,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    roster: BTreeSet<PeerId>,
    states: HashMap<PeerId, StateRecord>,
    queues: HashMap<PeerId, VecDeque<String>>,
}

impl Inner {
    fn live_state(&mut self, peer: &PeerId) -> Option<&mut StateRecord> {
        let expired = self
            .states
            .get(peer)
            .is_some_and(|record| record.expires_at <= Instant::now());
        if expired {
            debug!(%peer, "State record expired");
            self.states.remove(peer);
        }
        self.states.get_mut(peer)
    }
}

/// In-process shared store.
///
/// Expiry runs on `tokio::time`, so paused-clock tests can fast-forward TTLs.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    channel: broadcast::Sender<String>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            channel,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the store going away (every call fails) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn add_peer(&self, peer: &PeerId) -> StoreResult<()> {
        self.check()?;
        self.inner.lock().await.roster.insert(peer.clone());
        Ok(())
    }

    async fn remove_peer(&self, peer: &PeerId) -> StoreResult<()> {
        self.check()?;
        self.inner.lock().await.roster.remove(peer);
        Ok(())
    }

    async fn roster(&self) -> StoreResult<Vec<PeerId>> {
        self.check()?;
        Ok(self.inner.lock().await.roster.iter().cloned().collect())
    }

    async fn write_state(
        &self,
        peer: &PeerId,
        fields: StateFields,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let expires_at = Instant::now() + ttl;
        match inner.live_state(peer) {
            Some(record) => {
                record.fields.extend(fields);
                record.expires_at = expires_at;
            }
            None => {
                inner
                    .states
                    .insert(peer.clone(), StateRecord { fields, expires_at });
            }
        }
        Ok(())
    }

    async fn read_state(&self, peer: &PeerId) -> StoreResult<Option<StateFields>> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        Ok(inner.live_state(peer).map(|record| record.fields.clone()))
    }

    async fn delete_state(&self, peer: &PeerId) -> StoreResult<()> {
        self.check()?;
        self.inner.lock().await.states.remove(peer);
        Ok(())
    }

    async fn push_event(&self, peer: &PeerId, raw: String) -> StoreResult<()> {
        self.check()?;
        self.inner
            .lock()
            .await
            .queues
            .entry(peer.clone())
            .or_default()
            .push_back(raw);
        Ok(())
    }

    async fn pop_event(&self, peer: &PeerId) -> StoreResult<Option<String>> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        Ok(inner.queues.get_mut(peer).and_then(VecDeque::pop_front))
    }

    async fn events(&self, peer: &PeerId) -> StoreResult<Vec<String>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get(peer)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_events(&self, peer: &PeerId) -> StoreResult<()> {
        self.check()?;
        self.inner.lock().await.queues.remove(peer);
        Ok(())
    }

    async fn publish(&self, raw: String) -> StoreResult<usize> {
        self.check()?;
        // No subscribers is not an error, the record is simply lost.
        Ok(self.channel.send(raw).unwrap_or(0))
    }

    async fn subscribe(&self) -> StoreResult<EventSubscription> {
        self.check()?;
        Ok(EventSubscription::new(self.channel.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> StateFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn state_writes_merge_fields() {
        let store = MemoryStore::new();
        let peer = PeerId::new("a");
        let ttl = Duration::from_secs(60);
        store
            .write_state(&peer, fields(&[("x", "1"), ("avatarId", "3")]), ttl)
            .await
            .unwrap();
        store
            .write_state(&peer, fields(&[("x", "2")]), ttl)
            .await
            .unwrap();

        let state = store.read_state(&peer).await.unwrap().unwrap();
        assert_eq!(state["x"], "2");
        assert_eq!(state["avatarId"], "3");
    }

    #[tokio::test(start_paused = true)]
    async fn state_expires_unless_refreshed() {
        let store = MemoryStore::new();
        let peer = PeerId::new("a");
        let ttl = Duration::from_secs(10);
        store
            .write_state(&peer, fields(&[("x", "1")]), ttl)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        store
            .write_state(&peer, fields(&[("y", "1")]), ttl)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.read_state(&peer).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.read_state(&peer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queues_are_fifo() {
        let store = MemoryStore::new();
        let peer = PeerId::new("a");
        store.push_event(&peer, "one".into()).await.unwrap();
        store.push_event(&peer, "two".into()).await.unwrap();

        assert_eq!(store.events(&peer).await.unwrap(), vec!["one", "two"]);
        assert_eq!(store.pop_event(&peer).await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.pop_event(&peer).await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.pop_event(&peer).await.unwrap(), None);
    }

    #[tokio::test]
    async fn broadcast_is_not_replayed() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("early".into()).await.unwrap(), 0);

        let mut sub = store.subscribe().await.unwrap();
        assert_eq!(store.publish("late".into()).await.unwrap(), 1);
        assert_eq!(sub.drain(), vec!["late"]);
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.roster().await,
            Err(StoreError::Unavailable)
        ));
        assert!(store.subscribe().await.is_err());

        store.set_available(true);
        assert!(store.roster().await.unwrap().is_empty());
    }
}
