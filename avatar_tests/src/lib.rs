//! Fixtures shared by the integration tests.

use std::{sync::Arc, time::Duration};

use avatar_client::{input::InputState, AvatarClient};
use avatar_shared::{
    components::Position, config::SessionConfig, net::PeerId, store::MemoryStore,
};

/// Fixed step used by the integration tests.
pub const TICK: Duration = Duration::from_millis(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Default session settings with every participant spawning at (100, 100).
pub fn test_config() -> SessionConfig {
    SessionConfig {
        spawn_x: 100.0,
        spawn_y: 100.0,
        ..SessionConfig::default()
    }
}

pub async fn join(store: &Arc<MemoryStore>, peer: &str) -> AvatarClient {
    join_with(store, peer, test_config()).await
}

pub async fn join_with(store: &Arc<MemoryStore>, peer: &str, cfg: SessionConfig) -> AvatarClient {
    AvatarClient::connect(store.clone(), PeerId::new(peer), cfg).await
}

/// Ticks every client `n` times in lockstep with the same input.
pub async fn run(clients: &mut [&mut AvatarClient], input: InputState, n: usize) {
    for _ in 0..n {
        for client in clients.iter_mut() {
            client.tick(input, TICK).await;
        }
    }
}

/// Position of the entity standing in for `peer` in `viewer`'s world.
pub fn seen_position(viewer: &AvatarClient, peer: &str) -> Option<Position> {
    let entity = viewer.entity_for(&PeerId::new(peer))?;
    viewer.world().get::<Position>(entity).copied()
}
