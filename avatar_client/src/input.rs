//! Input handling.
//!
//! Raw keyboard capture lives outside this crate. Whatever produces input
//! hands over four directional flags per tick; they are latched onto every
//! input-driven entity before movement resolution.

use avatar_shared::{
    components::{queries, Input},
    ecs::World,
    net::MoveDirection,
};

/// Directional flags sampled for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputState {
    /// Only the flag for `direction` set.
    pub fn only(direction: MoveDirection) -> Self {
        let mut state = Self::default();
        state.set(direction, true);
        state
    }

    pub fn set(&mut self, direction: MoveDirection, pressed: bool) {
        match direction {
            MoveDirection::Up => self.up = pressed,
            MoveDirection::Down => self.down = pressed,
            MoveDirection::Left => self.left = pressed,
            MoveDirection::Right => self.right = pressed,
        }
    }

    pub fn is_idle(self) -> bool {
        !(self.up || self.down || self.left || self.right)
    }
}

impl From<InputState> for Input {
    fn from(s: InputState) -> Self {
        Input {
            up: s.up,
            down: s.down,
            left: s.left,
            right: s.right,
        }
    }
}

/// Anything that can produce a per-tick input sample.
pub trait InputSource {
    fn sample(&mut self) -> InputState;
}

/// Press/release tracker, e.g. for console- or script-driven input.
#[derive(Debug, Default)]
pub struct HeldKeys {
    state: InputState,
}

impl HeldKeys {
    pub fn hold(&mut self, direction: MoveDirection) {
        self.state.set(direction, true);
    }

    pub fn release(&mut self, direction: MoveDirection) {
        self.state.set(direction, false);
    }

    /// Releases everything, e.g. when focus is lost.
    pub fn release_all(&mut self) {
        self.state = InputState::default();
    }
}

impl InputSource for HeldKeys {
    fn sample(&mut self) -> InputState {
        self.state
    }
}

/// Latches `input` onto every input-driven entity.
pub fn latch(world: &mut World, input: InputState) {
    for entity in world.query(queries::INPUT_DRIVEN) {
        if let Some(flags) = world.get_mut::<Input>(entity) {
            *flags = input.into();
        }
    }
}
