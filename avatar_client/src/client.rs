//! Client implementation.
//!
//! The client owns:
//! - The entity world with the local avatar
//! - Input latching and movement resolution
//! - Event interpolation for discrete actions
//! - Remote reconciliation against the shared store
//! - The live event subscription and the local inbound queue
//! - Optional housekeeping of stale peers
//!
//! Store failures never abort a tick. A client that could not join keeps
//! simulating locally and retries on the sync cadence.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use avatar_shared::{
    components::{
        Avatar, AvatarDirection, EventQueue, Input, Movement, Position, Renderable, Rotation,
        Scale,
    },
    config::SessionConfig,
    ecs::{EntityId, World},
    net::{decode_event, now_ms, AvatarEvent, MoveDirection, PeerId, PeerState},
    render::{collect_sprites, SpriteView},
    store::{EventSubscription, SharedStore, StoreError},
};
use tracing::{debug, info, warn};

use crate::{
    input::{latch, HeldKeys, InputState},
    interp::{EventInterpolator, InterpolationSettings},
    movement::MovementResolver,
    reconcile::{ReconciliationService, SyncReport},
    session::Session,
};

/// Upper bound of inbound records consumed per drain.
const MAX_INBOUND_PER_DRAIN: usize = 64;

/// High-level avatar client.
pub struct AvatarClient {
    session: Session,
    world: World,
    local: EntityId,

    movement: MovementResolver,
    events: EventInterpolator,
    reconcile: ReconciliationService,
    subscription: Option<EventSubscription>,

    connected: bool,
    clock: Duration,
    tick: u64,
    last_connect_attempt: Duration,
    last_inbound_drain: Option<Duration>,
    last_housekeeping: Duration,
}

impl AvatarClient {
    /// Spawns the local avatar and joins the shared session.
    ///
    /// Never fails: when the store is unreachable the client starts
    /// disconnected and keeps retrying from [`AvatarClient::tick`].
    pub async fn connect(store: Arc<dyn SharedStore>, peer: PeerId, cfg: SessionConfig) -> Self {
        let session = Session::new(store, peer, cfg);
        let cfg = session.config();

        let mut world = World::default();
        let local = world.spawn();
        world.insert(
            local,
            Position {
                x: cfg.spawn_x,
                y: cfg.spawn_y,
            },
        );
        world.insert(local, Scale::default());
        world.insert(local, Rotation::default());
        world.insert(
            local,
            Avatar {
                id: cfg.avatar_id,
                current_direction: AvatarDirection::Center,
            },
        );
        world.insert(
            local,
            Movement {
                velocity: cfg.move_speed,
                target_x: cfg.spawn_x,
                target_y: cfg.spawn_y,
                is_moving: false,
            },
        );
        world.insert(local, Input::default());
        world.insert(local, EventQueue);
        world.insert(local, Renderable);

        let events = EventInterpolator::new(InterpolationSettings::from(cfg));
        let reconcile = ReconciliationService::new(session.clone());

        let mut client = Self {
            session,
            world,
            local,
            movement: MovementResolver::new(),
            events,
            reconcile,
            subscription: None,
            connected: false,
            clock: Duration::ZERO,
            tick: 0,
            last_connect_attempt: Duration::ZERO,
            last_inbound_drain: None,
            last_housekeeping: Duration::ZERO,
        };
        client.try_join().await;
        client
    }

    async fn try_join(&mut self) {
        self.last_connect_attempt = self.clock;
        let initial = self.local_state();
        let directory = self.session.directory();

        let joined = async {
            directory.join(initial).await?;
            directory.subscribe().await
        }
        .await;

        match joined {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.connected = true;
                info!(peer = %self.session.peer(), "Joined session");
            }
            Err(e) => {
                self.subscription = None;
                self.connected = false;
                warn!(peer = %self.session.peer(), error = %e, "Failed to join session");
            }
        }
    }

    fn local_state(&self) -> PeerState {
        let pos = self.local_position();
        PeerState {
            x: pos.x.trunc() as i32,
            y: pos.y.trunc() as i32,
            direction: self.local_direction(),
            avatar_id: self.session.config().avatar_id,
            last_seen: now_ms(),
        }
    }

    /// Advances the session by `dt`.
    ///
    /// Order: input latch, movement, incoming events, interpolation,
    /// reconciliation, housekeeping. Returns the snapshot diff applied on
    /// this tick, if one was pulled.
    pub async fn tick(&mut self, input: InputState, dt: Duration) -> Option<SyncReport> {
        self.clock += dt;
        self.tick += 1;

        latch(&mut self.world, input);
        self.movement.resolve(&mut self.world, dt.as_secs_f32());

        if self.connected {
            self.route_incoming();
            if self.inbound_due() {
                self.drain_inbound().await;
            }
        }

        self.events.advance(&mut self.world, self.clock);

        let mut report = None;
        if self.connected {
            report = self.reconcile.execute(&mut self.world, self.clock).await;
            if let Some(r) = &report {
                for (_, entity) in &r.removed {
                    self.events.forget(*entity);
                }
            }
        } else if self.clock.saturating_sub(self.last_connect_attempt)
            >= self.session.config().sync_interval()
        {
            self.try_join().await;
        }

        if self.session.config().housekeeper {
            self.housekeeping().await;
        }

        report
    }

    /// Routes everything delivered on the broadcast channel.
    fn route_incoming(&mut self) {
        let Some(subscription) = self.subscription.as_mut() else {
            return;
        };
        for raw in subscription.drain() {
            match decode_event(&raw) {
                Ok(event) => self.dispatch(event),
                Err(e) => warn!(error = %e, "Discarding malformed broadcast event"),
            }
        }
    }

    fn dispatch(&mut self, event: AvatarEvent) {
        let entity = if event.user_id == *self.session.peer() {
            Some(self.local)
        } else {
            self.reconcile.entity_for(&event.user_id)
        };
        match entity {
            Some(entity) => self.events.enqueue(entity, event),
            None => debug!(
                user = %event.user_id,
                event_id = %event.event_id,
                "Discarding event for unknown peer"
            ),
        }
    }

    fn inbound_due(&self) -> bool {
        self.last_inbound_drain.map_or(true, |last| {
            self.clock.saturating_sub(last) >= self.session.config().sync_interval()
        })
    }

    /// Moves queued inbound actions onto the local avatar.
    async fn drain_inbound(&mut self) {
        self.last_inbound_drain = Some(self.clock);
        for _ in 0..MAX_INBOUND_PER_DRAIN {
            match self.session.directory().pop_event().await {
                Ok(Some(event)) => {
                    debug!(event_id = %event.event_id, "Inbound event");
                    self.events.enqueue(self.local, event);
                }
                Ok(None) => break,
                Err(StoreError::Unavailable) => {
                    warn!("Failed to drain inbound queue: store unavailable");
                    break;
                }
                Err(e) => warn!(error = %e, "Discarding malformed inbound event"),
            }
        }
    }

    async fn housekeeping(&mut self) {
        let interval = self.session.config().housekeeping_interval();
        if self.clock.saturating_sub(self.last_housekeeping) < interval {
            return;
        }
        self.last_housekeeping = self.clock;

        let cutoff = self.session.config().inactive_cutoff();
        match self.session.directory().sweep_inactive(cutoff).await {
            Ok(0) => debug!("Housekeeping found no stale peers"),
            Ok(removed) => info!(removed, "Removed inactive peers"),
            Err(e) => warn!(error = %e, "Housekeeping failed"),
        }
    }

    /// Broadcasts a one-step move of the local avatar.
    pub async fn publish_move(&self, direction: MoveDirection) -> anyhow::Result<AvatarEvent> {
        let event = AvatarEvent::movement(self.session.peer().clone(), direction);
        self.publish(event).await
    }

    /// Broadcasts a jump of the local avatar.
    pub async fn publish_jump(&self, duration: Option<Duration>) -> anyhow::Result<AvatarEvent> {
        let event = AvatarEvent::jump(self.session.peer().clone(), duration);
        self.publish(event).await
    }

    async fn publish(&self, event: AvatarEvent) -> anyhow::Result<AvatarEvent> {
        self.session
            .directory()
            .publish(&event)
            .await
            .context("publish event")?;
        Ok(event)
    }

    /// Queues `event` on `peer`'s inbound queue.
    pub async fn send_event(&self, peer: &PeerId, event: &AvatarEvent) -> anyhow::Result<()> {
        self.session
            .directory()
            .push_event(peer, event)
            .await
            .with_context(|| format!("push event to {peer}"))
    }

    /// Queues an action on the local avatar without going through the store.
    pub fn enqueue_local(&mut self, event: AvatarEvent) {
        self.events.enqueue(self.local, event);
    }

    /// Leaves the session and drops every remote entity.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.reconcile.clear(&mut self.world);
        self.events.clear();
        if self.connected {
            self.session
                .directory()
                .leave()
                .await
                .context("leave session")?;
        }
        info!(peer = %self.session.peer(), ticks = self.tick, "Left session");
        Ok(())
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn local_entity(&self) -> EntityId {
        self.local
    }

    pub fn peer(&self) -> &PeerId {
        self.session.peer()
    }

    pub fn config(&self) -> &SessionConfig {
        self.session.config()
    }

    pub fn local_position(&self) -> Position {
        self.world
            .get::<Position>(self.local)
            .copied()
            .unwrap_or_default()
    }

    pub fn local_direction(&self) -> AvatarDirection {
        self.world
            .get::<Avatar>(self.local)
            .map(|a| a.current_direction)
            .unwrap_or_default()
    }

    /// Render-ready view of every visible entity.
    pub fn sprites(&self) -> Vec<SpriteView> {
        collect_sprites(&self.world)
    }

    pub fn remote_count(&self) -> usize {
        self.reconcile.remote_count()
    }

    pub fn remote_peers(&self) -> Vec<PeerId> {
        self.reconcile.remote_peers()
    }

    /// Local entity standing in for `peer`.
    pub fn entity_for(&self, peer: &PeerId) -> Option<EntityId> {
        if peer == self.session.peer() {
            Some(self.local)
        } else {
            self.reconcile.entity_for(peer)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Session time accumulated from tick deltas.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn events(&self) -> &EventInterpolator {
        &self.events
    }

    /// Executes a console command.
    pub async fn exec_console(
        &mut self,
        keys: &mut HeldKeys,
        line: &str,
    ) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let direction = || tokens.get(1).and_then(|s| MoveDirection::parse(s));

        match tokens[0] {
            "hold" | "release" => {
                let Some(dir) = direction() else {
                    return Ok(vec![format!("Usage: {} <up|down|left|right>", tokens[0])]);
                };
                if tokens[0] == "hold" {
                    keys.hold(dir);
                } else {
                    keys.release(dir);
                }
                Ok(vec![])
            }
            "stop" => {
                keys.release_all();
                Ok(vec!["Released all keys".to_string()])
            }
            "move" => {
                let Some(dir) = direction() else {
                    return Ok(vec!["Usage: move <up|down|left|right>".to_string()]);
                };
                let event = self.publish_move(dir).await?;
                Ok(vec![format!("Published {}", event.event_id)])
            }
            "jump" => {
                let duration = match tokens.get(1) {
                    Some(ms) => match ms.parse::<u64>() {
                        Ok(ms) => Some(Duration::from_millis(ms)),
                        Err(_) => return Ok(vec!["Usage: jump [duration_ms]".to_string()]),
                    },
                    None => None,
                };
                let event = self.publish_jump(duration).await?;
                Ok(vec![format!("Published {}", event.event_id)])
            }
            "status" => {
                let pos = self.local_position();
                Ok(vec![
                    format!("Peer: {}", self.peer()),
                    format!("Connected: {}", self.connected),
                    format!("Tick: {} ({:.1}s)", self.tick, self.clock.as_secs_f32()),
                    format!(
                        "Position: ({:.1}, {:.1}) facing {}",
                        pos.x,
                        pos.y,
                        self.local_direction().name()
                    ),
                    format!("Remote peers: {}", self.remote_count()),
                    format!(
                        "Actions: {} active, {} queued",
                        self.events.active_count(),
                        self.events.queued_count()
                    ),
                ])
            }
            "peers" => {
                let mut out = Vec::new();
                for peer in self.remote_peers() {
                    let Some(entity) = self.reconcile.entity_for(&peer) else {
                        continue;
                    };
                    let pos = self.world.get::<Position>(entity).copied().unwrap_or_default();
                    let facing = self
                        .world
                        .get::<Avatar>(entity)
                        .map(|a| a.current_direction)
                        .unwrap_or_default();
                    out.push(format!(
                        "{peer} ({:.0}, {:.0}) {}",
                        pos.x,
                        pos.y,
                        facing.name()
                    ));
                }
                if out.is_empty() {
                    out.push("No remote peers".to_string());
                }
                Ok(out)
            }
            "sweep" => {
                let cutoff = self.session.config().inactive_cutoff();
                let removed = self
                    .session
                    .directory()
                    .sweep_inactive(cutoff)
                    .await
                    .context("sweep inactive peers")?;
                Ok(vec![format!("Removed {removed} inactive peers")])
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }
}
