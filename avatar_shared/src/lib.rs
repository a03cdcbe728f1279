//! `avatar_shared`
//!
//! Shared libraries for every participant of the avatar space.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (ecs, components, math, wire records, store).
//! - Traits at the integration seams (shared store, renderer, assets).
//! - No `unsafe`.

pub mod components;
pub mod config;
pub mod directory;
pub mod ecs;
pub mod math;
pub mod net;
pub mod render;
pub mod store;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::components::*;
    pub use crate::config::*;
    pub use crate::directory::*;
    pub use crate::ecs::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::store::*;
}
