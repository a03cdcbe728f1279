//! Peer directory: the session-level view of the shared store.
//!
//! Binds a [`SharedStore`] to the local [`PeerId`] and speaks in decoded
//! records: joining and leaving the roster, snapshots of every peer, position
//! pushes, action queues and the stale-peer sweep.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    components::AvatarDirection,
    net::{
        decode_event, encode_event, now_ms, AvatarEvent, PeerId, PeerState, Snapshot, StateFields,
        parse_int, FIELD_AVATAR_ID, FIELD_DIRECTION, FIELD_LAST_SEEN, FIELD_X, FIELD_Y,
    },
    store::{EventSubscription, SharedStore, StoreResult},
};

/// Local peer's handle on the shared store.
#[derive(Clone)]
pub struct PeerDirectory {
    store: Arc<dyn SharedStore>,
    peer: PeerId,
    state_ttl: Duration,
    avatar_id: u32,
}

impl PeerDirectory {
    pub fn new(store: Arc<dyn SharedStore>, peer: PeerId, state_ttl: Duration) -> Self {
        Self {
            store,
            peer,
            state_ttl,
            avatar_id: 1,
        }
    }

    /// Skin written along with every position push.
    pub fn with_avatar_id(mut self, avatar_id: u32) -> Self {
        self.avatar_id = avatar_id;
        self
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    /// Registers the local peer with its initial state.
    pub async fn join(&self, initial: PeerState) -> StoreResult<()> {
        self.store.add_peer(&self.peer).await?;
        self.store
            .write_state(&self.peer, initial.to_fields(), self.state_ttl)
            .await?;
        info!(peer = %self.peer, x = initial.x, y = initial.y, "Joined shared space");
        Ok(())
    }

    /// Removes the local peer's roster entry, state and queue.
    pub async fn leave(&self) -> StoreResult<()> {
        self.store.remove_peer(&self.peer).await?;
        self.store.delete_state(&self.peer).await?;
        self.store.delete_events(&self.peer).await?;
        info!(peer = %self.peer, "Left shared space");
        Ok(())
    }

    /// Reads every rostered peer with a live, well-formed state record.
    ///
    /// Peers without state (expired) are skipped; malformed records are
    /// logged and skipped.
    pub async fn snapshot(&self) -> StoreResult<Snapshot> {
        let roster = self.store.roster().await?;
        let mut snapshot = Snapshot::default();
        for peer in roster {
            let Some(fields) = self.store.read_state(&peer).await? else {
                debug!(%peer, "Rostered peer has no state");
                continue;
            };
            match PeerState::from_fields(&fields) {
                Ok(state) => {
                    snapshot.peers.insert(peer, state);
                }
                Err(e) => warn!(%peer, error = %e, "Discarding malformed peer state"),
            }
        }
        Ok(snapshot)
    }

    /// Writes the local position/facing and refreshes the record's expiry.
    ///
    /// Coordinates are stored as integers (truncated). The skin is written too,
    /// so a record recreated after expiry is complete.
    pub async fn update_position(
        &self,
        x: f32,
        y: f32,
        direction: AvatarDirection,
    ) -> StoreResult<()> {
        let mut fields = StateFields::new();
        fields.insert(FIELD_X.to_string(), (x.trunc() as i32).to_string());
        fields.insert(FIELD_Y.to_string(), (y.trunc() as i32).to_string());
        fields.insert(
            FIELD_DIRECTION.to_string(),
            direction.as_u8().to_string(),
        );
        fields.insert(FIELD_AVATAR_ID.to_string(), self.avatar_id.to_string());
        fields.insert(FIELD_LAST_SEEN.to_string(), now_ms().to_string());
        self.store
            .write_state(&self.peer, fields, self.state_ttl)
            .await
    }

    /// Queues an action for `peer` to consume.
    pub async fn push_event(&self, peer: &PeerId, event: &AvatarEvent) -> StoreResult<()> {
        let raw = encode_event(event)?;
        self.store.push_event(peer, raw).await
    }

    /// Pops the local peer's next queued action.
    ///
    /// A record that fails to parse is consumed and reported as an error.
    pub async fn pop_event(&self) -> StoreResult<Option<AvatarEvent>> {
        match self.store.pop_event(&self.peer).await? {
            Some(raw) => decode_event(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Reads the local peer's queued actions without consuming them.
    ///
    /// Malformed records are skipped.
    pub async fn event_queue(&self) -> StoreResult<Vec<AvatarEvent>> {
        let raws = self.store.events(&self.peer).await?;
        Ok(raws
            .iter()
            .filter_map(|raw| match decode_event(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed queued event");
                    None
                }
            })
            .collect())
    }

    /// Broadcasts an action to every subscriber.
    pub async fn publish(&self, event: &AvatarEvent) -> StoreResult<usize> {
        let raw = encode_event(event)?;
        let receivers = self.store.publish(raw).await?;
        debug!(event_id = %event.event_id, receivers, "Published event");
        Ok(receivers)
    }

    pub async fn subscribe(&self) -> StoreResult<EventSubscription> {
        self.store.subscribe().await
    }

    /// Drops every peer whose `lastSeen` is older than `cutoff`.
    ///
    /// Safe to run concurrently from several participants. Returns how many
    /// peers were removed.
    pub async fn sweep_inactive(&self, cutoff: Duration) -> StoreResult<usize> {
        let threshold = now_ms() - cutoff.as_millis() as i64;
        let mut removed = 0;
        for peer in self.store.roster().await? {
            let Some(fields) = self.store.read_state(&peer).await? else {
                continue;
            };
            let last_seen = fields
                .get(FIELD_LAST_SEEN)
                .and_then(|raw| parse_int(raw));
            let Some(last_seen) = last_seen else {
                continue;
            };
            if last_seen < threshold {
                self.store.remove_peer(&peer).await?;
                self.store.delete_state(&peer).await?;
                self.store.delete_events(&peer).await?;
                info!(%peer, last_seen, "Swept inactive peer");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
