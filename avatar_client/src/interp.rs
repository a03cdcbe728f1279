//! Event interpolation.
//!
//! Discrete, time-bounded actions (one-step moves, jumps) arrive as
//! [`AvatarEvent`]s. Each entity has a FIFO of pending actions and at most one
//! active action. Every tick the active action's progress is recomputed from
//! the session clock, so the trajectory depends only on elapsed time and not
//! on how many frames happened in between.
//!
//! Lifecycle per entity: idle -> queued -> active -> idle. An action that
//! completes on a tick clears the active slot; the next queued action is
//! promoted on the following tick.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use avatar_shared::{
    components::{queries, Avatar, AvatarDirection, Position},
    config::SessionConfig,
    ecs::{EntityId, World},
    math::{parabola_offset, Vec2},
    net::{AvatarEvent, EventKind, MoveDirection},
};
use tracing::{debug, info};

/// Tunables of the action trajectories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationSettings {
    /// Distance covered by one MOVE.
    pub move_step: f32,
    /// Apex height of a JUMP.
    pub jump_height: f32,
    pub move_duration: Duration,
    pub jump_duration: Duration,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for InterpolationSettings {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            move_step: cfg.move_step,
            jump_height: cfg.jump_height,
            move_duration: cfg.move_duration(),
            jump_duration: cfg.jump_duration(),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveEvent {
    event: AvatarEvent,
    started_at: Duration,
    duration: Duration,
    start: Vec2,
    target: Vec2,
}

impl ActiveEvent {
    fn progress(&self, now: Duration) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0) as f32
    }
}

/// Per-entity action queues plus the active-action slots.
#[derive(Debug, Default)]
pub struct EventInterpolator {
    settings: InterpolationSettings,
    queues: HashMap<EntityId, VecDeque<AvatarEvent>>,
    active: HashMap<EntityId, ActiveEvent>,
    completed: u64,
}

impl EventInterpolator {
    pub fn new(settings: InterpolationSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &InterpolationSettings {
        &self.settings
    }

    /// Appends an action to the entity's queue.
    pub fn enqueue(&mut self, entity: EntityId, event: AvatarEvent) {
        debug!(%entity, event_id = %event.event_id, kind = ?event.event_type, "Queued event");
        self.queues.entry(entity).or_default().push_back(event);
    }

    /// Advances every event-driven entity to `now` (session clock).
    pub fn advance(&mut self, world: &mut World, now: Duration) {
        for entity in world.query(queries::EVENT_DRIVEN) {
            if self.active.contains_key(&entity) {
                self.step_active(world, entity, now);
            } else {
                self.promote(world, entity, now);
            }
        }
    }

    fn step_active(&mut self, world: &mut World, entity: EntityId, now: Duration) {
        let Some(active) = self.active.get(&entity) else {
            return;
        };
        let progress = active.progress(now);

        match active.event.event_type {
            EventKind::Move => {
                let at = active.start.lerp(active.target, progress);
                let facing = facing_from_delta(active.target - active.start);
                set_position(world, entity, at);
                if let Some(avatar) = world.get_mut::<Avatar>(entity) {
                    avatar.current_direction = facing;
                }
            }
            EventKind::Jump => {
                let at = jump_position(active.start, self.settings.jump_height, progress);
                set_position(world, entity, at);
            }
        }

        if progress >= 1.0 {
            self.complete(world, entity);
        }
    }

    fn complete(&mut self, world: &mut World, entity: EntityId) {
        let Some(done) = self.active.remove(&entity) else {
            return;
        };
        set_position(world, entity, done.target);
        self.completed += 1;
        info!(
            %entity,
            event_id = %done.event.event_id,
            kind = ?done.event.event_type,
            "Completed event"
        );
    }

    fn promote(&mut self, world: &World, entity: EntityId, now: Duration) {
        let Some(event) = self.queues.get_mut(&entity).and_then(VecDeque::pop_front) else {
            return;
        };
        let Some(pos) = world.get::<Position>(entity) else {
            return;
        };
        let start = Vec2::new(pos.x, pos.y);

        let (duration, target) = match event.event_type {
            EventKind::Move => {
                let step = self.settings.move_step;
                let offset = match event.payload.direction {
                    Some(MoveDirection::Up) => Vec2::new(0.0, -step),
                    Some(MoveDirection::Down) => Vec2::new(0.0, step),
                    Some(MoveDirection::Left) => Vec2::new(-step, 0.0),
                    Some(MoveDirection::Right) => Vec2::new(step, 0.0),
                    None => Vec2::ZERO,
                };
                (
                    event.duration().unwrap_or(self.settings.move_duration),
                    start + offset,
                )
            }
            EventKind::Jump => (
                event.duration().unwrap_or(self.settings.jump_duration),
                start,
            ),
        };

        info!(
            %entity,
            event_id = %event.event_id,
            kind = ?event.event_type,
            duration_ms = duration.as_millis() as u64,
            "Started event"
        );
        self.active.insert(
            entity,
            ActiveEvent {
                event,
                started_at: now,
                duration,
                start,
                target,
            },
        );
    }

    pub fn is_active(&self, entity: EntityId) -> bool {
        self.active.contains_key(&entity)
    }

    /// Number of entities with an action in progress.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Total number of actions waiting behind active ones.
    pub fn queued_count(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Number of actions that ran to completion.
    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// Drops the queue and active action of a destroyed entity.
    pub fn forget(&mut self, entity: EntityId) {
        self.queues.remove(&entity);
        self.active.remove(&entity);
    }

    pub fn clear(&mut self) {
        self.queues.clear();
        self.active.clear();
    }
}

/// Point on a jump arc: x held, y lifted by the parabola (y grows downwards).
pub fn jump_position(base: Vec2, apex: f32, progress: f32) -> Vec2 {
    Vec2::new(base.x, base.y - parabola_offset(apex, progress))
}

/// Facing for a displacement: the dominant axis decides, ties go vertical.
pub fn facing_from_delta(delta: Vec2) -> AvatarDirection {
    if delta.x.abs() > delta.y.abs() {
        if delta.x > 0.0 {
            AvatarDirection::Right
        } else {
            AvatarDirection::Left
        }
    } else if delta.y != 0.0 {
        if delta.y > 0.0 {
            AvatarDirection::Front
        } else {
            AvatarDirection::Back
        }
    } else {
        AvatarDirection::Center
    }
}

fn set_position(world: &mut World, entity: EntityId, at: Vec2) {
    if let Some(pos) = world.get_mut::<Position>(entity) {
        pos.x = at.x;
        pos.y = at.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_shared::{components::EventQueue, net::PeerId};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn spawn_target(world: &mut World, x: f32, y: f32) -> EntityId {
        let e = world.spawn();
        world.insert(e, Position { x, y });
        world.insert(e, Avatar::default());
        world.insert(e, EventQueue);
        e
    }

    fn pos(world: &World, e: EntityId) -> (f32, f32) {
        let p = world.get::<Position>(e).unwrap();
        (p.x, p.y)
    }

    fn peer() -> PeerId {
        PeerId::new("tester")
    }

    #[test]
    fn move_up_lands_one_step_away() {
        let mut world = World::default();
        let e = spawn_target(&mut world, 100.0, 100.0);
        let mut interp = EventInterpolator::default();
        interp.enqueue(e, AvatarEvent::movement(peer(), MoveDirection::Up));

        interp.advance(&mut world, ms(0));
        assert!(interp.is_active(e));
        assert_eq!(pos(&world, e), (100.0, 100.0));

        interp.advance(&mut world, ms(250));
        assert_eq!(pos(&world, e), (100.0, 75.0));
        assert_eq!(
            world.get::<Avatar>(e).unwrap().current_direction,
            AvatarDirection::Back
        );

        interp.advance(&mut world, ms(500));
        assert_eq!(pos(&world, e), (100.0, 50.0));
        assert!(!interp.is_active(e));
        assert_eq!(interp.completed_count(), 1);
    }

    #[test]
    fn queue_advances_on_the_following_tick() {
        let mut world = World::default();
        let e = spawn_target(&mut world, 0.0, 0.0);
        let mut interp = EventInterpolator::default();
        interp.enqueue(e, AvatarEvent::movement(peer(), MoveDirection::Right));
        interp.enqueue(e, AvatarEvent::movement(peer(), MoveDirection::Down));
        assert_eq!(interp.queued_count(), 2);

        interp.advance(&mut world, ms(0));
        assert_eq!(interp.queued_count(), 1);

        // Completes the first move; the second is not started yet.
        interp.advance(&mut world, ms(600));
        assert_eq!(pos(&world, e), (50.0, 0.0));
        assert!(!interp.is_active(e));
        assert_eq!(interp.queued_count(), 1);

        interp.advance(&mut world, ms(700));
        assert!(interp.is_active(e));
        assert_eq!(interp.queued_count(), 0);

        interp.advance(&mut world, ms(1200));
        assert_eq!(pos(&world, e), (50.0, 50.0));
        assert_eq!(interp.completed_count(), 2);
    }

    #[test]
    fn completion_is_applied_once() {
        let mut world = World::default();
        let e = spawn_target(&mut world, 10.0, 10.0);
        let mut interp = EventInterpolator::default();
        interp.enqueue(e, AvatarEvent::movement(peer(), MoveDirection::Left));
        interp.advance(&mut world, ms(0));
        interp.advance(&mut world, ms(900));
        assert_eq!(pos(&world, e), (-40.0, 10.0));

        // Something else moves the entity; late ticks must not pull it back.
        world.get_mut::<Position>(e).unwrap().x = 123.0;
        interp.advance(&mut world, ms(900));
        interp.advance(&mut world, ms(5000));
        assert_eq!(pos(&world, e), (123.0, 10.0));
        assert_eq!(interp.completed_count(), 1);
    }

    #[test]
    fn jump_arc_is_symmetric() {
        let mut world = World::default();
        let e = spawn_target(&mut world, 200.0, 300.0);
        let mut interp = EventInterpolator::default();
        interp.enqueue(e, AvatarEvent::jump(peer(), None));

        interp.advance(&mut world, ms(0));
        assert_eq!(pos(&world, e), (200.0, 300.0));

        interp.advance(&mut world, ms(200));
        let (_, quarter) = pos(&world, e);
        interp.advance(&mut world, ms(400));
        assert_eq!(pos(&world, e), (200.0, 250.0));
        interp.advance(&mut world, ms(600));
        let (_, three_quarters) = pos(&world, e);
        assert!((quarter - three_quarters).abs() < 1e-3);

        interp.advance(&mut world, ms(800));
        assert_eq!(pos(&world, e), (200.0, 300.0));
        assert!(!interp.is_active(e));
    }

    #[test]
    fn jump_position_endpoints() {
        let base = Vec2::new(5.0, 80.0);
        assert_eq!(jump_position(base, 30.0, 0.0), base);
        assert_eq!(jump_position(base, 30.0, 1.0), base);
        assert_eq!(jump_position(base, 30.0, 0.5), Vec2::new(5.0, 50.0));
    }

    #[test]
    fn payload_duration_overrides_default() {
        let mut world = World::default();
        let e = spawn_target(&mut world, 0.0, 0.0);
        let mut interp = EventInterpolator::default();
        interp.enqueue(e, AvatarEvent::jump(peer(), Some(ms(100))));
        interp.advance(&mut world, ms(0));
        interp.advance(&mut world, ms(100));
        assert!(!interp.is_active(e));
    }

    #[test]
    fn zero_duration_still_spans_two_ticks() {
        let mut world = World::default();
        let e = spawn_target(&mut world, 0.0, 0.0);
        let mut interp = EventInterpolator::default();
        let mut event = AvatarEvent::movement(peer(), MoveDirection::Down);
        event.payload.duration = Some(0);
        interp.enqueue(e, event);

        interp.advance(&mut world, ms(0));
        assert!(interp.is_active(e));
        assert_eq!(pos(&world, e), (0.0, 0.0));
        interp.advance(&mut world, ms(0));
        assert_eq!(pos(&world, e), (0.0, 50.0));
    }

    #[test]
    fn entities_without_event_queue_are_left_alone() {
        let mut world = World::default();
        let e = world.spawn();
        world.insert(e, Position { x: 1.0, y: 1.0 });
        world.insert(e, Avatar::default());
        let mut interp = EventInterpolator::default();
        interp.enqueue(e, AvatarEvent::movement(peer(), MoveDirection::Up));

        interp.advance(&mut world, ms(0));
        interp.advance(&mut world, ms(1000));
        assert_eq!(pos(&world, e), (1.0, 1.0));
        assert_eq!(interp.queued_count(), 1);

        interp.forget(e);
        assert_eq!(interp.queued_count(), 0);
    }

    #[test]
    fn facing_prefers_dominant_axis() {
        assert_eq!(facing_from_delta(Vec2::new(5.0, 1.0)), AvatarDirection::Right);
        assert_eq!(facing_from_delta(Vec2::new(-5.0, 1.0)), AvatarDirection::Left);
        assert_eq!(facing_from_delta(Vec2::new(3.0, 3.0)), AvatarDirection::Front);
        assert_eq!(facing_from_delta(Vec2::new(0.0, -2.0)), AvatarDirection::Back);
        assert_eq!(facing_from_delta(Vec2::ZERO), AvatarDirection::Center);
    }
}
