//! Multi-participant reconciliation over one shared in-memory store.

use std::sync::Arc;
use std::time::Duration;

use avatar_client::input::InputState;
use avatar_shared::components::{Avatar, AvatarDirection, Position, RemoteAvatar};
use avatar_shared::net::{MoveDirection, PeerId};
use avatar_shared::store::{MemoryStore, SharedStore};
use avatar_tests::{init_tracing, join, join_with, run, seen_position, test_config};

#[tokio::test]
async fn two_participants_see_only_each_other() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut a = join(&store, "A").await;
    let mut b = join(&store, "B").await;

    run(&mut [&mut a, &mut b], InputState::default(), 1).await;

    assert_eq!(a.remote_peers(), vec![PeerId::new("B")]);
    assert_eq!(b.remote_peers(), vec![PeerId::new("A")]);
    assert_eq!(a.entity_for(&PeerId::new("A")), Some(a.local_entity()));

    let remote = a.entity_for(&PeerId::new("B")).expect("B tracked by A");
    assert!(a.world().get::<RemoteAvatar>(remote).expect("marker").is_remote);
    assert_eq!(seen_position(&a, "B"), Some(Position { x: 100.0, y: 100.0 }));

    // Local avatar plus one remote.
    assert_eq!(a.sprites().len(), 2);
    Ok(())
}

#[tokio::test]
async fn movement_is_visible_after_next_sync() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut a = join(&store, "A").await;
    let mut b = join(&store, "B").await;
    run(&mut [&mut a, &mut b], InputState::default(), 1).await;

    // 0.5s at 200 px/s.
    for _ in 0..5 {
        a.tick(InputState::default(), avatar_tests::TICK).await;
        b.tick(InputState::only(MoveDirection::Right), avatar_tests::TICK)
            .await;
    }
    assert_eq!(b.local_position(), Position { x: 200.0, y: 100.0 });
    assert_eq!(b.local_direction(), AvatarDirection::Right);

    // A has not pulled since t=0.1s.
    assert_eq!(seen_position(&a, "B"), Some(Position { x: 100.0, y: 100.0 }));

    run(&mut [&mut a, &mut b], InputState::default(), 6).await;
    assert_eq!(seen_position(&a, "B"), Some(Position { x: 200.0, y: 100.0 }));

    let remote = a.entity_for(&PeerId::new("B")).expect("B tracked by A");
    assert_eq!(
        a.world().get::<Avatar>(remote).map(|av| av.current_direction),
        Some(AvatarDirection::Center)
    );
    Ok(())
}

#[tokio::test]
async fn leaving_participant_is_removed_on_next_sync() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut a = join(&store, "A").await;
    let mut b = join(&store, "B").await;
    run(&mut [&mut a, &mut b], InputState::default(), 1).await;
    let remote = a.entity_for(&PeerId::new("B")).expect("B tracked by A");

    b.shutdown().await?;
    assert_eq!(store.roster().await?, vec![PeerId::new("A")]);

    run(&mut [&mut a], InputState::default(), 10).await;
    assert_eq!(a.remote_count(), 0);
    assert!(!a.world().is_alive(remote));
    assert_eq!(a.sprites().len(), 1);
    Ok(())
}

#[tokio::test]
async fn late_joiner_sees_existing_positions() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut a = join(&store, "A").await;
    run(&mut [&mut a], InputState::only(MoveDirection::Down), 5).await;
    run(&mut [&mut a], InputState::default(), 1).await;

    let mut c = join_with(
        &store,
        "C",
        avatar_shared::config::SessionConfig {
            spawn_x: 10.0,
            spawn_y: 10.0,
            ..test_config()
        },
    )
    .await;
    run(&mut [&mut c], InputState::default(), 1).await;

    assert_eq!(seen_position(&c, "A"), Some(Position { x: 100.0, y: 200.0 }));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_participant_expires_out_of_snapshots() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let cfg = avatar_shared::config::SessionConfig {
        state_ttl_secs: 2,
        ..test_config()
    };
    let mut a = join_with(&store, "A", cfg.clone()).await;
    let mut b = join_with(&store, "B", cfg).await;
    run(&mut [&mut a, &mut b], InputState::default(), 1).await;
    assert_eq!(a.remote_count(), 1);

    // B stops ticking, so its state is no longer renewed.
    tokio::time::advance(Duration::from_secs(3)).await;
    run(&mut [&mut a], InputState::default(), 10).await;

    assert_eq!(a.remote_count(), 0);
    // Still listed in the roster until it leaves or is swept.
    assert!(store.roster().await?.contains(&PeerId::new("B")));
    Ok(())
}
