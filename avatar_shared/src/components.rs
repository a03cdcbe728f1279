//! Component types and their column storage.

use serde::{Deserialize, Serialize};

use crate::ecs::{Column, Component, ComponentMask};

/// Facing direction of an avatar; also selects the skin frame to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AvatarDirection {
    #[default]
    Center = 0,
    Back = 1,
    Front = 2,
    Left = 3,
    Right = 4,
}

impl AvatarDirection {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(AvatarDirection::Center),
            1 => Some(AvatarDirection::Back),
            2 => Some(AvatarDirection::Front),
            3 => Some(AvatarDirection::Left),
            4 => Some(AvatarDirection::Right),
            _ => None,
        }
    }

    /// Decodes a wire value; anything unknown faces the camera.
    pub fn from_wire(v: i64) -> Self {
        u8::try_from(v)
            .ok()
            .and_then(Self::from_u8)
            .unwrap_or_default()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Asset name of the frame for this direction.
    pub fn name(self) -> &'static str {
        match self {
            AvatarDirection::Center => "center",
            AvatarDirection::Back => "back",
            AvatarDirection::Front => "front",
            AvatarDirection::Left => "left",
            AvatarDirection::Right => "right",
        }
    }
}

/// World coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Render scale factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub x: f32,
    pub y: f32,
}

impl Default for Scale {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Render rotation in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rotation {
    pub angle: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    /// Skin id used for asset lookup.
    pub id: u32,
    pub current_direction: AvatarDirection,
}

impl Default for Avatar {
    fn default() -> Self {
        Self {
            id: 1,
            current_direction: AvatarDirection::Center,
        }
    }
}

/// Local movement target state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Movement {
    /// Pixels per second.
    pub velocity: f32,
    pub target_x: f32,
    pub target_y: f32,
    pub is_moving: bool,
}

/// Directional flags latched for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Input {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl Input {
    pub fn any(self) -> bool {
        self.up || self.down || self.left || self.right
    }
}

/// Numeric handle derived from a peer's string identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct NetworkId {
    pub user_id: u32,
}

impl NetworkId {
    /// 32-bit rolling hash (`h * 31 + unit` over UTF-16 units), made non-negative.
    ///
    /// Collisions are tolerated; this is for display correlation only.
    pub fn from_peer(peer: &str) -> Self {
        let hash = peer
            .encode_utf16()
            .fold(0i32, |h, unit| {
                h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit))
            });
        Self {
            user_id: hash.unsigned_abs(),
        }
    }
}

/// Marks a peer-owned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RemoteAvatar {
    pub is_remote: bool,
}

/// Marker: entity takes part in event interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventQueue;

/// Marker: entity is exposed to the render consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Renderable;

macro_rules! components {
    ($($ty:ident => $field:ident : $flag:ident),* $(,)?) => {
        /// One column per component type.
        #[derive(Default)]
        pub struct Columns {
            $($field: Column<$ty>,)*
        }

        impl Columns {
            pub(crate) fn clear_slot(&mut self, index: usize) {
                $(self.$field.take(index);)*
            }
        }

        $(
            impl Component for $ty {
                const MASK: ComponentMask = ComponentMask::$flag;

                fn column(columns: &Columns) -> &Column<Self> {
                    &columns.$field
                }

                fn column_mut(columns: &mut Columns) -> &mut Column<Self> {
                    &mut columns.$field
                }
            }
        )*
    };
}

components! {
    Position => position: POSITION,
    Scale => scale: SCALE,
    Rotation => rotation: ROTATION,
    Avatar => avatar: AVATAR,
    Movement => movement: MOVEMENT,
    Input => input: INPUT,
    NetworkId => network_id: NETWORK_ID,
    RemoteAvatar => remote_avatar: REMOTE_AVATAR,
    EventQueue => event_queue: EVENT_QUEUE,
    Renderable => renderable: RENDERABLE,
}

/// Precomputed capability sets used by the systems.
pub mod queries {
    use crate::ecs::ComponentMask;

    /// Locally-driven avatars that read input.
    pub const INPUT_DRIVEN: ComponentMask = ComponentMask::INPUT
        .union(ComponentMask::POSITION)
        .union(ComponentMask::AVATAR)
        .union(ComponentMask::MOVEMENT);

    /// Anything that integrates toward a movement target.
    pub const MOVABLE: ComponentMask = ComponentMask::POSITION
        .union(ComponentMask::AVATAR)
        .union(ComponentMask::MOVEMENT);

    pub const AVATARS: ComponentMask = ComponentMask::POSITION.union(ComponentMask::AVATAR);

    /// Entities the event interpolation engine may drive.
    pub const EVENT_DRIVEN: ComponentMask = ComponentMask::EVENT_QUEUE
        .union(ComponentMask::POSITION)
        .union(ComponentMask::AVATAR);

    pub const RENDERABLE: ComponentMask =
        ComponentMask::POSITION.union(ComponentMask::RENDERABLE);
}
