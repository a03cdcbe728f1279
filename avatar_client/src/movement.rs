//! Movement resolution.
//!
//! Turns latched directional flags into a movement target, then advances
//! positions toward their targets at `velocity` px/sec.
//!
//! Holding a key keeps the target one `velocity` ahead of the avatar, so
//! travel continues until the key is released; releasing every key stops the
//! avatar where it stands.

use std::f32::consts::FRAC_1_SQRT_2;

use avatar_shared::{
    components::{queries, Avatar, AvatarDirection, Input, Movement, Position},
    ecs::{EntityId, World},
    math::Vec2,
};
use tracing::trace;

/// Below this distance an entity snaps onto its target.
pub const ARRIVAL_DISTANCE: f32 = 1.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct MovementResolver;

impl MovementResolver {
    pub fn new() -> Self {
        Self
    }

    /// Input resolution followed by position integration.
    pub fn resolve(&self, world: &mut World, dt_sec: f32) {
        self.process_input(world);
        self.integrate(world, dt_sec);
    }

    /// Computes targets and facing from the latched flags.
    ///
    /// Per axis the later flag wins (down over up, right over left);
    /// horizontal facing wins over vertical facing.
    pub fn process_input(&self, world: &mut World) {
        for entity in world.query(queries::INPUT_DRIVEN) {
            let (Some(&input), Some(&pos)) =
                (world.get::<Input>(entity), world.get::<Position>(entity))
            else {
                continue;
            };

            let vertical = if input.down {
                1.0
            } else if input.up {
                -1.0
            } else {
                0.0
            };
            let horizontal = if input.right {
                1.0
            } else if input.left {
                -1.0
            } else {
                0.0
            };

            let direction = if horizontal > 0.0 {
                AvatarDirection::Right
            } else if horizontal < 0.0 {
                AvatarDirection::Left
            } else if vertical > 0.0 {
                AvatarDirection::Front
            } else if vertical < 0.0 {
                AvatarDirection::Back
            } else {
                AvatarDirection::Center
            };

            if let Some(movement) = world.get_mut::<Movement>(entity) {
                let step = if vertical != 0.0 && horizontal != 0.0 {
                    movement.velocity * FRAC_1_SQRT_2
                } else {
                    movement.velocity
                };
                // A moving entity always has a target away from its position.
                if direction == AvatarDirection::Center || step <= 0.0 {
                    movement.target_x = pos.x;
                    movement.target_y = pos.y;
                    movement.is_moving = false;
                } else {
                    movement.target_x = pos.x + horizontal * step;
                    movement.target_y = pos.y + vertical * step;
                    movement.is_moving = true;
                }
            }
            set_direction(world, entity, direction);
        }
    }

    /// Moves every moving entity toward its target.
    pub fn integrate(&self, world: &mut World, dt_sec: f32) {
        for entity in world.query(queries::MOVABLE) {
            let (Some(&movement), Some(&pos)) =
                (world.get::<Movement>(entity), world.get::<Position>(entity))
            else {
                continue;
            };
            if !movement.is_moving {
                continue;
            }

            let here = Vec2::new(pos.x, pos.y);
            let target = Vec2::new(movement.target_x, movement.target_y);
            let delta = target - here;
            let distance = delta.len();

            if distance < ARRIVAL_DISTANCE {
                if let Some(p) = world.get_mut::<Position>(entity) {
                    p.x = target.x;
                    p.y = target.y;
                }
                if let Some(m) = world.get_mut::<Movement>(entity) {
                    m.is_moving = false;
                }
                set_direction(world, entity, AvatarDirection::Center);
                trace!(%entity, x = target.x, y = target.y, "Arrived at target");
            } else {
                let next = here + delta.normalized().scale(movement.velocity * dt_sec);
                if let Some(p) = world.get_mut::<Position>(entity) {
                    p.x = next.x;
                    p.y = next.y;
                }
            }
        }
    }
}

fn set_direction(world: &mut World, entity: EntityId, direction: AvatarDirection) {
    if let Some(avatar) = world.get_mut::<Avatar>(entity) {
        avatar.current_direction = direction;
    }
}
