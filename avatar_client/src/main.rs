//! Standalone demo binary.
//!
//! Usage:
//!   cargo run -p avatar_client -- [--config session.json] [--peer id]
//!       [--avatar 3] [--speed 200] [--tick-hz 60] [--bots 4] [--housekeeper]
//!
//! Runs one interactive participant plus scripted bots, all sharing one
//! in-process store. Rendering is traced at `trace` level.
//!
//! Console commands:
//!   hold <dir>     - Start holding a direction key
//!   release <dir>  - Release a direction key
//!   stop           - Release every key
//!   move <dir>     - Broadcast a one-step move
//!   jump [ms]      - Broadcast a jump
//!   status         - Show client status
//!   peers          - List remote peers
//!   sweep          - Remove inactive peers from the store
//!   quit           - Leave the session and exit

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use avatar_client::input::{HeldKeys, InputSource};
use avatar_client::AvatarClient;
use avatar_shared::config::SessionConfig;
use avatar_shared::net::{MoveDirection, PeerId};
use avatar_shared::render::{render_frame, AllAssets, RenderBackend, SpriteView};
use avatar_shared::store::{MemoryStore, SharedStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

struct Args {
    cfg: SessionConfig,
    peer: PeerId,
    bots: usize,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SessionConfig::load(&PathBuf::from(&args[i + 1]))?,
        _ => SessionConfig::default(),
    };
    let mut peer = PeerId::random();
    let mut bots = 0;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--peer" if i + 1 < args.len() => {
                peer = PeerId::new(args[i + 1].clone());
                i += 2;
            }
            "--avatar" if i + 1 < args.len() => {
                cfg.avatar_id = args[i + 1].parse().context("parse --avatar")?;
                i += 2;
            }
            "--speed" if i + 1 < args.len() => {
                cfg.move_speed = args[i + 1].parse().context("parse --speed")?;
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            "--bots" if i + 1 < args.len() => {
                bots = args[i + 1].parse().context("parse --bots")?;
                i += 2;
            }
            "--housekeeper" => {
                cfg.housekeeper = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, peer, bots })
}

/// Logs every drawn sprite.
#[derive(Default)]
struct TraceRenderer {
    frame: u64,
}

impl RenderBackend for TraceRenderer {
    fn begin_frame(&mut self) {
        self.frame += 1;
    }

    fn draw_sprite(&mut self, sprite: &SpriteView) {
        trace!(
            frame = self.frame,
            entity = %sprite.entity,
            x = sprite.x,
            y = sprite.y,
            facing = sprite.avatar.map(|a| a.facing.name()),
            "Draw"
        );
    }

    fn end_frame(&mut self) {}
}

const DIRECTIONS: [MoveDirection; 4] = [
    MoveDirection::Up,
    MoveDirection::Down,
    MoveDirection::Left,
    MoveDirection::Right,
];

/// Scripted participant doing a random walk.
struct Bot {
    client: AvatarClient,
    keys: HeldKeys,
    rng: StdRng,
    next_change: Duration,
}

impl Bot {
    async fn spawn(store: Arc<dyn SharedStore>, base: &SessionConfig, n: usize) -> Self {
        let mut rng = StdRng::from_entropy();
        let cfg = SessionConfig {
            spawn_x: rng.gen_range(100.0..700.0),
            spawn_y: rng.gen_range(100.0..500.0),
            avatar_id: rng.gen_range(1..=8),
            housekeeper: false,
            ..base.clone()
        };
        let client = AvatarClient::connect(store, PeerId::new(format!("bot-{n}")), cfg).await;
        Self {
            client,
            keys: HeldKeys::default(),
            rng,
            next_change: Duration::ZERO,
        }
    }

    async fn step(&mut self, dt: Duration) {
        if self.client.clock() >= self.next_change {
            self.keys.release_all();
            if self.rng.gen_bool(0.6) {
                self.keys.hold(DIRECTIONS[self.rng.gen_range(0..DIRECTIONS.len())]);
            }
            if self.rng.gen_bool(0.15) {
                if let Err(e) = self.client.publish_jump(None).await {
                    debug!(peer = %self.client.peer(), error = %e, "Bot jump failed");
                }
            }
            self.next_change =
                self.client.clock() + Duration::from_millis(self.rng.gen_range(500..2500));
        }
        let input = self.keys.sample();
        self.client.tick(input, dt).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, peer, bots } = parse_args()?;
    info!(peer = %peer, tick_hz = cfg.tick_hz, bots, "Starting avatar session");

    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let dt = cfg.tick_interval();
    let status_every = u64::from(cfg.tick_hz.max(1)) * 10;

    let mut crowd = Vec::with_capacity(bots);
    for n in 0..bots {
        crowd.push(Bot::spawn(store.clone(), &cfg, n).await);
    }

    let mut client = AvatarClient::connect(store.clone(), peer, cfg).await;
    let mut keys = HeldKeys::default();
    let mut renderer = TraceRenderer::default();

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread; EOF ends the session.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("> ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    let _ = console_tx.blocking_send("quit".to_string());
                    break;
                }
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Joined as {}. Type 'status' for info, 'quit' to exit.", client.peer());
    println!();

    let mut next_tick = tokio::time::Instant::now();
    'session: loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                break 'session;
            }
            match client.exec_console(&mut keys, &line).await {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {:#}", e);
                }
            }
        }

        if let Some(report) = client.tick(keys.sample(), dt).await {
            if !report.created.is_empty() || !report.removed.is_empty() {
                info!(
                    joined = report.created.len(),
                    left = report.removed.len(),
                    remote = client.remote_count(),
                    "Peers changed"
                );
            }
        }
        for bot in crowd.iter_mut() {
            bot.step(dt).await;
        }

        render_frame(client.world(), &mut renderer, &AllAssets);

        if client.ticks() % status_every == 0 {
            let pos = client.local_position();
            info!(
                tick = client.ticks(),
                x = pos.x,
                y = pos.y,
                remote = client.remote_count(),
                connected = client.is_connected(),
                "Status"
            );
        }

        next_tick += dt;
        tokio::time::sleep_until(next_tick).await;
    }

    for bot in crowd {
        bot.client.shutdown().await?;
    }
    client.shutdown().await?;
    Ok(())
}
