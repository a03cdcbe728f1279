//! `avatar_client`
//!
//! Per-participant systems:
//! - Session context (identity, store handle, configuration)
//! - Input latching and continuous movement
//! - Event interpolation for discrete actions
//! - Reconciliation of remote avatars against the shared store
//! - The client loop tying them together

pub mod client;
pub mod input;
pub mod interp;
pub mod movement;
pub mod reconcile;
pub mod session;

pub use client::AvatarClient;
