//! Remote reconciliation.
//!
//! Keeps the local view of other participants aligned with the shared store:
//! on its own cadence it pulls a full snapshot and diffs it against the
//! locally tracked remote entities; every tick it pushes the local avatar's
//! position and facing.
//!
//! Last snapshot wins. Remote entities jump straight to each snapshot's
//! position; a peer that is missing from a snapshot is removed on that same
//! cycle. Expiry of stale peers is the store's business, never inferred here.

use std::{collections::HashMap, time::Duration};

use avatar_shared::{
    components::{
        queries, Avatar, EventQueue, NetworkId, Position, RemoteAvatar, Renderable, Rotation,
        Scale,
    },
    ecs::{ComponentMask, EntityId, World},
    net::{now_ms, PeerId, PeerState, Snapshot},
};
use tracing::{debug, info, warn};

use crate::session::Session;

/// Outcome of applying one snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<(PeerId, EntityId)>,
    pub updated: usize,
    pub removed: Vec<(PeerId, EntityId)>,
}

pub struct ReconciliationService {
    session: Session,
    tracked: HashMap<PeerId, EntityId>,
    sync_interval: Duration,
    last_sync: Option<Duration>,
    push_failing: bool,
    /// Set when a snapshot came back without the local peer.
    rejoin: bool,
}

impl ReconciliationService {
    pub fn new(session: Session) -> Self {
        let sync_interval = session.config().sync_interval();
        Self {
            session,
            tracked: HashMap::new(),
            sync_interval,
            last_sync: None,
            push_failing: false,
            rejoin: false,
        }
    }

    /// Whether a snapshot pull is due at `now` (session clock).
    pub fn sync_due(&self, now: Duration) -> bool {
        self.last_sync
            .map_or(true, |last| now.saturating_sub(last) >= self.sync_interval)
    }

    /// One tick: pull and apply a snapshot if due, then push local state.
    ///
    /// Store failures are logged and skipped; returns the applied diff, if any.
    pub async fn execute(&mut self, world: &mut World, now: Duration) -> Option<SyncReport> {
        let mut report = None;
        if self.sync_due(now) {
            self.last_sync = Some(now);
            match self.session.directory().snapshot().await {
                Ok(snapshot) => {
                    if !snapshot.contains(self.session.peer()) {
                        warn!(
                            peer = %self.session.peer(),
                            "Local peer missing from store, rejoining"
                        );
                        self.rejoin = true;
                    }
                    report = Some(self.apply_snapshot(world, &snapshot));
                }
                Err(e) => warn!(error = %e, "Failed to sync peers from store"),
            }
        }
        self.push_local(world).await;
        report
    }

    /// Diffs `snapshot` against the tracked remote entities and applies it.
    pub fn apply_snapshot(&mut self, world: &mut World, snapshot: &Snapshot) -> SyncReport {
        let mut report = SyncReport::default();
        let local = self.session.peer().clone();

        let gone: Vec<PeerId> = self
            .tracked
            .keys()
            .filter(|peer| !snapshot.contains(peer))
            .cloned()
            .collect();
        for peer in gone {
            if let Some(entity) = self.tracked.remove(&peer) {
                world.destroy(entity);
                info!(%peer, %entity, "Removed remote avatar");
                report.removed.push((peer, entity));
            }
        }

        let mut peers: Vec<(&PeerId, &PeerState)> = snapshot.peers.iter().collect();
        peers.sort_by(|a, b| a.0.cmp(b.0));
        for (peer, state) in peers {
            if *peer == local {
                continue;
            }
            match self.tracked.get(peer) {
                Some(&entity) if world.is_alive(entity) => {
                    overwrite_remote(world, entity, state);
                    report.updated += 1;
                }
                _ => {
                    let entity = spawn_remote(world, peer, state);
                    self.tracked.insert(peer.clone(), entity);
                    info!(%peer, %entity, x = state.x, y = state.y, "Created remote avatar");
                    report.created.push((peer.clone(), entity));
                }
            }
        }

        debug!(
            created = report.created.len(),
            updated = report.updated,
            removed = report.removed.len(),
            "Applied snapshot"
        );
        report
    }

    /// Pushes the local avatar's position and facing to the store.
    ///
    /// After the local peer was found missing (swept, or its record expired)
    /// the push is a full join instead, restoring the roster entry.
    pub async fn push_local(&mut self, world: &World) {
        let Some(entity) = local_avatar(world) else {
            return;
        };
        let (Some(pos), Some(avatar)) = (world.get::<Position>(entity), world.get::<Avatar>(entity))
        else {
            return;
        };

        let directory = self.session.directory();
        let result = if self.rejoin {
            let state = PeerState {
                x: pos.x.trunc() as i32,
                y: pos.y.trunc() as i32,
                direction: avatar.current_direction,
                avatar_id: avatar.id,
                last_seen: now_ms(),
            };
            let joined = directory.join(state).await;
            if joined.is_ok() {
                self.rejoin = false;
            }
            joined
        } else {
            directory
                .update_position(pos.x, pos.y, avatar.current_direction)
                .await
        };
        match result {
            Ok(()) if self.push_failing => {
                self.push_failing = false;
                info!("Local state push recovered");
            }
            Ok(()) => {}
            Err(e) if !self.push_failing => {
                self.push_failing = true;
                warn!(error = %e, "Failed to push local state");
            }
            Err(e) => debug!(error = %e, "Local state push still failing"),
        }
    }

    /// Local entity of a tracked peer.
    pub fn entity_for(&self, peer: &PeerId) -> Option<EntityId> {
        self.tracked.get(peer).copied()
    }

    pub fn remote_count(&self) -> usize {
        self.tracked.len()
    }

    /// Tracked peers, sorted.
    pub fn remote_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.tracked.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Destroys every tracked remote entity.
    pub fn clear(&mut self, world: &mut World) -> Vec<EntityId> {
        let entities: Vec<EntityId> = self.tracked.drain().map(|(_, e)| e).collect();
        for &entity in &entities {
            world.destroy(entity);
        }
        entities
    }
}

/// The first avatar not marked as remote.
pub fn local_avatar(world: &World) -> Option<EntityId> {
    world
        .query_without(queries::AVATARS, ComponentMask::REMOTE_AVATAR)
        .into_iter()
        .next()
}

fn spawn_remote(world: &mut World, peer: &PeerId, state: &PeerState) -> EntityId {
    let entity = world.spawn();
    world.insert(entity, Position::default());
    world.insert(entity, Scale::default());
    world.insert(entity, Rotation::default());
    world.insert(entity, Avatar::default());
    world.insert(entity, RemoteAvatar { is_remote: true });
    world.insert(entity, NetworkId::from_peer(peer.as_str()));
    world.insert(entity, EventQueue);
    world.insert(entity, Renderable);
    overwrite_remote(world, entity, state);
    entity
}

fn overwrite_remote(world: &mut World, entity: EntityId, state: &PeerState) {
    if let Some(pos) = world.get_mut::<Position>(entity) {
        pos.x = state.x as f32;
        pos.y = state.y as f32;
    }
    if let Some(avatar) = world.get_mut::<Avatar>(entity) {
        avatar.id = state.avatar_id;
        avatar.current_direction = state.direction;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use avatar_shared::{
        components::AvatarDirection,
        config::SessionConfig,
        net::now_ms,
        store::{MemoryStore, SharedStore},
    };

    fn session(store: Arc<MemoryStore>, peer: &str) -> Session {
        Session::new(store, PeerId::new(peer), SessionConfig::default())
    }

    fn state(x: i32, y: i32, direction: u8) -> PeerState {
        PeerState {
            x,
            y,
            direction: AvatarDirection::from_wire(i64::from(direction)),
            avatar_id: 2,
            last_seen: now_ms(),
        }
    }

    fn snapshot(peers: &[(&str, PeerState)]) -> Snapshot {
        Snapshot {
            peers: peers
                .iter()
                .map(|(id, s)| (PeerId::new(*id), *s))
                .collect(),
        }
    }

    #[test]
    fn local_peer_is_never_remote() {
        let mut world = World::default();
        let mut sync = ReconciliationService::new(session(Arc::new(MemoryStore::new()), "A"));

        let report = sync.apply_snapshot(
            &mut world,
            &snapshot(&[("A", state(10, 20, 1)), ("B", state(30, 40, 2))]),
        );

        assert_eq!(report.created.len(), 1);
        assert_eq!(sync.remote_peers(), vec![PeerId::new("B")]);
        let b = sync.entity_for(&PeerId::new("B")).unwrap();
        assert_eq!(world.get::<Position>(b), Some(&Position { x: 30.0, y: 40.0 }));
        assert_eq!(
            world.get::<Avatar>(b).unwrap().current_direction,
            AvatarDirection::Front
        );
        assert!(world.get::<RemoteAvatar>(b).unwrap().is_remote);
        assert_eq!(
            world.get::<NetworkId>(b),
            Some(&NetworkId::from_peer("B"))
        );
    }

    #[test]
    fn absent_peer_is_removed_on_the_first_missing_snapshot() {
        let mut world = World::default();
        let mut sync = ReconciliationService::new(session(Arc::new(MemoryStore::new()), "me"));

        sync.apply_snapshot(&mut world, &snapshot(&[("P", state(1, 1, 0))]));
        let p = sync.entity_for(&PeerId::new("P")).unwrap();
        assert!(world.is_alive(p));

        let report = sync.apply_snapshot(&mut world, &snapshot(&[("Q", state(2, 2, 0))]));
        assert_eq!(report.removed, vec![(PeerId::new("P"), p)]);
        assert!(!world.is_alive(p));
        assert_eq!(sync.remote_peers(), vec![PeerId::new("Q")]);
    }

    #[test]
    fn known_peers_teleport_to_latest_snapshot() {
        let mut world = World::default();
        let mut sync = ReconciliationService::new(session(Arc::new(MemoryStore::new()), "me"));
        sync.apply_snapshot(&mut world, &snapshot(&[("P", state(1, 1, 0))]));
        let p = sync.entity_for(&PeerId::new("P")).unwrap();

        let mut moved = state(90, -5, 3);
        moved.avatar_id = 9;
        let report = sync.apply_snapshot(&mut world, &snapshot(&[("P", moved)]));

        assert_eq!(report.updated, 1);
        assert!(report.created.is_empty());
        assert_eq!(sync.entity_for(&PeerId::new("P")), Some(p));
        assert_eq!(world.get::<Position>(p), Some(&Position { x: 90.0, y: -5.0 }));
        let avatar = world.get::<Avatar>(p).unwrap();
        assert_eq!((avatar.id, avatar.current_direction), (9, AvatarDirection::Left));
    }

    #[test]
    fn externally_destroyed_entity_is_recreated() {
        let mut world = World::default();
        let mut sync = ReconciliationService::new(session(Arc::new(MemoryStore::new()), "me"));
        sync.apply_snapshot(&mut world, &snapshot(&[("P", state(1, 1, 0))]));
        let old = sync.entity_for(&PeerId::new("P")).unwrap();
        world.destroy(old);

        let report = sync.apply_snapshot(&mut world, &snapshot(&[("P", state(1, 1, 0))]));
        assert_eq!(report.created.len(), 1);
        assert_ne!(sync.entity_for(&PeerId::new("P")), Some(old));
    }

    #[tokio::test]
    async fn execute_throttles_pulls_but_pushes_every_tick() {
        let store = Arc::new(MemoryStore::new());
        let me = session(store.clone(), "me");
        let other = session(store.clone(), "other");
        other.directory().join(state(5, 5, 0)).await.unwrap();
        me.directory().join(state(0, 0, 0)).await.unwrap();

        let mut world = World::default();
        let local = world.spawn();
        world.insert(local, Position { x: 12.9, y: 34.0 });
        world.insert(local, Avatar::default());

        let mut sync = ReconciliationService::new(me.clone());
        assert!(sync.execute(&mut world, Duration::ZERO).await.is_some());
        assert_eq!(sync.remote_count(), 1);

        other.directory().leave().await.unwrap();
        assert!(sync
            .execute(&mut world, Duration::from_millis(500))
            .await
            .is_none());
        assert_eq!(sync.remote_count(), 1);

        let report = sync
            .execute(&mut world, Duration::from_millis(1000))
            .await
            .unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(sync.remote_count(), 0);

        let pushed = me.directory().snapshot().await.unwrap();
        assert_eq!(pushed.peers[me.peer()].x, 12);
        assert_eq!(pushed.peers[me.peer()].y, 34);
    }

    #[tokio::test]
    async fn missing_local_peer_rejoins_with_full_record() {
        let store = Arc::new(MemoryStore::new());
        let me = session(store.clone(), "me");
        me.directory().join(state(0, 0, 0)).await.unwrap();

        let mut world = World::default();
        let local = world.spawn();
        world.insert(local, Position { x: 40.0, y: 60.0 });
        world.insert(
            local,
            Avatar {
                id: 6,
                current_direction: AvatarDirection::Back,
            },
        );

        // Swept by someone else.
        store.remove_peer(me.peer()).await.unwrap();
        store.delete_state(me.peer()).await.unwrap();

        let mut sync = ReconciliationService::new(me.clone());
        sync.execute(&mut world, Duration::ZERO).await;

        assert_eq!(store.roster().await.unwrap(), vec![me.peer().clone()]);
        let restored = me.directory().snapshot().await.unwrap().peers[me.peer()];
        assert_eq!((restored.x, restored.y, restored.avatar_id), (40, 60, 6));
        assert_eq!(restored.direction, AvatarDirection::Back);

        // Back to plain pushes once restored.
        store.remove_peer(me.peer()).await.unwrap();
        sync.execute(&mut world, Duration::from_millis(100)).await;
        assert!(store.roster().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let me = session(store.clone(), "me");
        let mut world = World::default();
        let mut sync = ReconciliationService::new(me);
        sync.apply_snapshot(&mut world, &snapshot(&[("P", state(1, 1, 0))]));

        store.set_available(false);
        assert!(sync.execute(&mut world, Duration::ZERO).await.is_none());
        assert_eq!(sync.remote_count(), 1);
    }
}
