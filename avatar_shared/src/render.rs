//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend. It
//! resolves per-entity draw data and hands it to a [`RenderBackend`].

use crate::{
    components::{queries, Avatar, AvatarDirection, Position, Rotation, Scale},
    ecs::{EntityId, World},
};

/// Asset selector for avatar entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarView {
    pub skin_id: u32,
    pub facing: AvatarDirection,
}

/// Resolved draw data of one renderable entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteView {
    pub entity: EntityId,
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
    pub avatar: Option<AvatarView>,
}

/// Collects draw data for every Position+Renderable entity, in slot order.
///
/// Missing Scale reads as 1, missing Rotation as 0.
pub fn collect_sprites(world: &World) -> Vec<SpriteView> {
    world
        .query(queries::RENDERABLE)
        .into_iter()
        .filter_map(|entity| {
            let pos = world.get::<Position>(entity)?;
            let scale = world.get::<Scale>(entity).copied().unwrap_or_default();
            let rotation = world.get::<Rotation>(entity).copied().unwrap_or_default();
            Some(SpriteView {
                entity,
                x: pos.x,
                y: pos.y,
                scale_x: scale.x,
                scale_y: scale.y,
                rotation: rotation.angle,
                avatar: world.get::<Avatar>(entity).map(|a| AvatarView {
                    skin_id: a.id,
                    facing: a.current_direction,
                }),
            })
        })
        .collect()
}

/// URL of the frame for one skin/direction pair.
pub fn avatar_asset_url(base: &str, skin_id: u32, direction: AvatarDirection) -> String {
    format!(
        "{}/{}/{}.png",
        base.trim_end_matches('/'),
        skin_id,
        direction.name()
    )
}

/// Answers whether a visual exists for a sprite.
pub trait AssetLookup {
    fn has_asset(&self, sprite: &SpriteView) -> bool;
}

/// Treats every sprite as drawable.
#[derive(Default)]
pub struct AllAssets;

impl AssetLookup for AllAssets {
    fn has_asset(&self, _sprite: &SpriteView) -> bool {
        true
    }
}

/// A minimal rendering API.
pub trait RenderBackend: Send + Sync {
    fn begin_frame(&mut self);
    fn draw_sprite(&mut self, sprite: &SpriteView);
    fn end_frame(&mut self);
}

/// A no-op renderer useful for headless tests.
#[derive(Default)]
pub struct NullRenderer;

impl RenderBackend for NullRenderer {
    fn begin_frame(&mut self) {}
    fn draw_sprite(&mut self, _sprite: &SpriteView) {}
    fn end_frame(&mut self) {}
}

/// Draws one frame; sprites without an asset are skipped.
///
/// Returns the number of sprites drawn.
pub fn render_frame(
    world: &World,
    backend: &mut dyn RenderBackend,
    assets: &dyn AssetLookup,
) -> usize {
    backend.begin_frame();
    let mut drawn = 0;
    for sprite in collect_sprites(world) {
        if !assets.has_asset(&sprite) {
            continue;
        }
        backend.draw_sprite(&sprite);
        drawn += 1;
    }
    backend.end_frame();
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Renderable;

    #[derive(Default)]
    struct Recorder {
        frames: usize,
        drawn: Vec<EntityId>,
    }

    impl RenderBackend for Recorder {
        fn begin_frame(&mut self) {
            self.frames += 1;
        }
        fn draw_sprite(&mut self, sprite: &SpriteView) {
            self.drawn.push(sprite.entity);
        }
        fn end_frame(&mut self) {}
    }

    struct SkinsOnly(u32);

    impl AssetLookup for SkinsOnly {
        fn has_asset(&self, sprite: &SpriteView) -> bool {
            sprite.avatar.is_some_and(|a| a.skin_id == self.0)
        }
    }

    #[test]
    fn sprites_default_scale_and_rotation() {
        let mut world = World::default();
        let e = world.spawn();
        world.insert(e, Position { x: 3.0, y: 4.0 });
        world.insert(e, Renderable);
        let hidden = world.spawn();
        world.insert(hidden, Position::default());

        let sprites = collect_sprites(&world);
        assert_eq!(sprites.len(), 1);
        assert_eq!((sprites[0].scale_x, sprites[0].scale_y), (1.0, 1.0));
        assert_eq!(sprites[0].rotation, 0.0);
        assert_eq!(sprites[0].avatar, None);
    }

    #[test]
    fn missing_assets_are_skipped() {
        let mut world = World::default();
        for skin in [1, 2] {
            let e = world.spawn();
            world.insert(e, Position::default());
            world.insert(e, Renderable);
            world.insert(
                e,
                Avatar {
                    id: skin,
                    current_direction: AvatarDirection::Front,
                },
            );
        }

        let mut recorder = Recorder::default();
        assert_eq!(render_frame(&world, &mut recorder, &SkinsOnly(2)), 1);
        assert_eq!(recorder.frames, 1);
        assert_eq!(recorder.drawn.len(), 1);
        assert_eq!(render_frame(&world, &mut NullRenderer, &AllAssets), 2);
    }

    #[test]
    fn asset_urls_name_the_direction() {
        assert_eq!(
            avatar_asset_url("https://cdn.test/", 3, AvatarDirection::Back),
            "https://cdn.test/3/back.png"
        );
    }
}
