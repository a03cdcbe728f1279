//! Wire records exchanged through the shared store.
//!
//! Goals:
//! - Peer identity, per-peer state and action records in one place.
//! - Keep serialization explicit: state records are flat string field maps
//!   (hash-style), action records are JSON.
//! - Decoding never panics; bad input surfaces as [`StoreError`].

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    components::AvatarDirection,
    store::{StoreError, StoreResult},
};

/// String identity of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// Random v4-style UUID identity.
    pub fn random() -> Self {
        let mut bytes: [u8; 16] = rand::random();
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        PeerId(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Flat field map of a per-peer state record.
pub type StateFields = HashMap<String, String>;

pub const FIELD_X: &str = "x";
pub const FIELD_Y: &str = "y";
pub const FIELD_DIRECTION: &str = "direction";
pub const FIELD_AVATAR_ID: &str = "avatarId";
pub const FIELD_LAST_SEEN: &str = "lastSeen";

/// Decoded per-peer state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerState {
    pub x: i32,
    pub y: i32,
    pub direction: AvatarDirection,
    pub avatar_id: u32,
    /// Epoch milliseconds of the last write.
    pub last_seen: i64,
}

impl PeerState {
    /// Encodes every field.
    pub fn to_fields(&self) -> StateFields {
        let mut fields = StateFields::new();
        fields.insert(FIELD_X.to_string(), self.x.to_string());
        fields.insert(FIELD_Y.to_string(), self.y.to_string());
        fields.insert(
            FIELD_DIRECTION.to_string(),
            self.direction.as_u8().to_string(),
        );
        fields.insert(FIELD_AVATAR_ID.to_string(), self.avatar_id.to_string());
        fields.insert(FIELD_LAST_SEEN.to_string(), self.last_seen.to_string());
        fields
    }

    /// Decodes a record. `x` and `y` are mandatory; the rest fall back to defaults.
    pub fn from_fields(fields: &StateFields) -> StoreResult<Self> {
        let x = required_int(fields, FIELD_X)?;
        let y = required_int(fields, FIELD_Y)?;
        let direction = optional_int(fields, FIELD_DIRECTION)?.unwrap_or(0);
        let avatar_id = optional_int(fields, FIELD_AVATAR_ID)?.unwrap_or(1);
        let last_seen = optional_int(fields, FIELD_LAST_SEEN)?.unwrap_or(0);

        Ok(PeerState {
            x: clamp_i32(x),
            y: clamp_i32(y),
            direction: AvatarDirection::from_wire(direction),
            avatar_id: u32::try_from(avatar_id).map_err(|_| StoreError::Malformed {
                field: FIELD_AVATAR_ID,
                value: avatar_id.to_string(),
            })?,
            last_seen,
        })
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Integer parse that, like a lenient string-to-int, drops a fractional part.
///
/// Every reader of state fields goes through this.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

fn required_int(fields: &StateFields, field: &'static str) -> StoreResult<i64> {
    optional_int(fields, field)?.ok_or(StoreError::Malformed {
        field,
        value: String::new(),
    })
}

fn optional_int(fields: &StateFields, field: &'static str) -> StoreResult<Option<i64>> {
    match fields.get(field) {
        None => Ok(None),
        Some(raw) => parse_int(raw).map(Some).ok_or_else(|| StoreError::Malformed {
            field,
            value: raw.clone(),
        }),
    }
}

/// Full point-in-time read of the roster and peer states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub peers: HashMap<PeerId, PeerState>,
}

impl Snapshot {
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Kind of timed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Move,
    Jump,
}

/// Requested step direction of a MOVE action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MoveDirection {
    Up,
    Down,
    Left,
    Right,
}

impl MoveDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "w" => Some(MoveDirection::Up),
            "down" | "s" => Some(MoveDirection::Down),
            "left" | "a" => Some(MoveDirection::Left),
            "right" | "d" => Some(MoveDirection::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<MoveDirection>,
    /// Duration override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Action record carried on the broadcast channel and per-peer queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarEvent {
    pub event_id: String,
    pub user_id: PeerId,
    pub event_type: EventKind,
    /// Epoch milliseconds at creation.
    pub timestamp: i64,
    #[serde(default)]
    pub payload: EventPayload,
}

impl AvatarEvent {
    /// A one-step MOVE issued by `user`.
    pub fn movement(user: PeerId, direction: MoveDirection) -> Self {
        Self::new(user, EventKind::Move, EventPayload {
            direction: Some(direction),
            duration: None,
        })
    }

    /// A JUMP issued by `user`, optionally with its own duration.
    pub fn jump(user: PeerId, duration: Option<Duration>) -> Self {
        Self::new(user, EventKind::Jump, EventPayload {
            direction: None,
            duration: duration.map(|d| d.as_millis() as u64),
        })
    }

    fn new(user: PeerId, kind: EventKind, payload: EventPayload) -> Self {
        let timestamp = now_ms();
        let prefix = match kind {
            EventKind::Move => "move",
            EventKind::Jump => "jump",
        };
        Self {
            event_id: format!("{prefix}_{timestamp}_{:08x}", rand::random::<u32>()),
            user_id: user,
            event_type: kind,
            timestamp,
            payload,
        }
    }

    /// Duration override carried by the payload.
    pub fn duration(&self) -> Option<Duration> {
        self.payload.duration.map(Duration::from_millis)
    }
}

/// Serializes an action record.
pub fn encode_event(event: &AvatarEvent) -> StoreResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Parses an action record.
pub fn decode_event(raw: &str) -> StoreResult<AvatarEvent> {
    Ok(serde_json::from_str(raw)?)
}
