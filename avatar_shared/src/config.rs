//! Configuration system.
//!
//! Loads session configuration from JSON strings/files. Every field has a
//! default, so `{}` is a valid config.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed simulation tick rate of the driver loop.
    pub tick_hz: u32,
    /// Cadence of full snapshot pulls from the shared store.
    pub sync_interval_ms: u64,
    /// Expiry renewed on every write of the local peer's state.
    pub state_ttl_secs: u64,
    /// Peers whose `lastSeen` is older than this are swept.
    pub inactive_cutoff_secs: u64,
    /// How often a housekeeper runs the sweep.
    pub housekeeping_interval_ms: u64,
    /// Whether this participant sweeps stale peers.
    pub housekeeper: bool,
    pub spawn_x: f32,
    pub spawn_y: f32,
    /// Local avatar speed in px/sec.
    pub move_speed: f32,
    /// Skin of the local avatar.
    pub avatar_id: u32,
    /// Distance covered by one MOVE action.
    pub move_step: f32,
    /// Apex height of a JUMP action.
    pub jump_height: f32,
    pub move_duration_ms: u64,
    pub jump_duration_ms: u64,
    /// Base URL of the per-skin direction frames.
    pub asset_base_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            sync_interval_ms: 1000,
            state_ttl_secs: 1800,
            inactive_cutoff_secs: 300,
            housekeeping_interval_ms: 60_000,
            housekeeper: false,
            spawn_x: 400.0,
            spawn_y: 300.0,
            move_speed: 200.0,
            avatar_id: 1,
            move_step: 50.0,
            jump_height: 50.0,
            move_duration_ms: 500,
            jump_duration_ms: 800,
            asset_base_url: "https://assets.example.com/avatars".to_string(),
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn inactive_cutoff(&self) -> Duration {
        Duration::from_secs(self.inactive_cutoff_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }

    pub fn move_duration(&self) -> Duration {
        Duration::from_millis(self.move_duration_ms)
    }

    pub fn jump_duration(&self) -> Duration {
        Duration::from_millis(self.jump_duration_ms)
    }

    /// Fixed timestep of the driver loop.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}
