//! Wire types shared with the room directory and the event feed
//!
//! Timestamps travel as epoch milliseconds and enums as snake_case names.
//! Every struct tolerates missing fields so a partially written record
//! degrades to defaults instead of failing to decode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{AttackKind, BoardSnapshot, PlayerStats, Position};
use crate::util::time::{to_millis, DISCONNECT_TIMEOUT_MS};

pub type PlayerId = Uuid;

/// Room lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    #[default]
    Waiting,
    Ready,
    Playing,
    Paused,
    Finished,
}

/// A seat in a room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    pub id: PlayerId,
    pub is_host: bool,
    pub is_ready: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub joined_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    pub display_name: Option<String>,
}

impl Player {
    pub fn new(id: PlayerId, is_host: bool, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            is_host,
            is_ready: false,
            joined_at,
            last_seen: Some(joined_at),
            display_name: None,
        }
    }

    /// Heartbeat older than the timeout. A player who never sent one is not flagged.
    pub fn is_disconnected(&self, now_ms: u64) -> bool {
        self.last_seen
            .map(|seen| now_ms.saturating_sub(to_millis(&seen)) > DISCONNECT_TIMEOUT_MS)
            .unwrap_or(false)
    }
}

/// Two-player room as stored in the directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Room {
    pub id: String,
    /// 6-digit join code for private rooms (same as the id)
    pub code: Option<String>,
    pub host_id: PlayerId,
    pub state: RoomState,
    pub players: BTreeMap<PlayerId, Player>,
    /// Shared seed both peers derive their boards from
    pub seed: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    pub winner_id: Option<PlayerId>,
    pub final_stats: Option<BTreeMap<PlayerId, PlayerStats>>,
}

impl Room {
    pub const MAX_PLAYERS: usize = 2;

    pub fn is_private(&self) -> bool {
        self.code.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= Self::MAX_PLAYERS
    }

    pub fn all_ready(&self) -> bool {
        self.players.len() == Self::MAX_PLAYERS && self.players.values().all(|p| p.is_ready)
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn opponent_of(&self, id: &PlayerId) -> Option<&Player> {
        self.players.values().find(|p| &p.id != id)
    }

    pub fn is_host(&self, id: &PlayerId) -> bool {
        &self.host_id == id
    }

    /// Apply a state write from a peer
    pub fn apply(&mut self, update: &RoomUpdate) {
        self.state = update.state;
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.state == RoomState::Finished {
            self.ended_at = update.ended_at;
            self.winner_id = update.winner_id;
            self.final_stats.clone_from(&update.final_stats);
        }
    }
}

/// Partial room write used for lifecycle transitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomUpdate {
    pub state: RoomState,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    pub winner_id: Option<PlayerId>,
    pub final_stats: Option<BTreeMap<PlayerId, PlayerStats>>,
}

impl RoomUpdate {
    pub fn state(state: RoomState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn playing(started_at: DateTime<Utc>) -> Self {
        Self {
            state: RoomState::Playing,
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    pub fn finished(
        ended_at: DateTime<Utc>,
        winner_id: Option<PlayerId>,
        final_stats: BTreeMap<PlayerId, PlayerStats>,
    ) -> Self {
        Self {
            state: RoomState::Finished,
            ended_at: Some(ended_at),
            winner_id,
            final_stats: Some(final_stats),
            ..Self::default()
        }
    }
}

/// Why a board snapshot was published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardUpdateReason {
    #[default]
    Periodic,
    /// A color wipe was undone on the owner's board
    Restoration,
}

/// Event body, one variant per kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Move {
        from: Position,
        to: Position,
        score: u32,
        #[serde(default)]
        largest_match: usize,
        /// Owner ran board recovery after this move
        #[serde(default)]
        recovered: bool,
    },
    Attack {
        slot: usize,
        attack: AttackKind,
        target_id: PlayerId,
    },
    BoardUpdate {
        #[serde(default)]
        reason: BoardUpdateReason,
        snapshot: BoardSnapshot,
    },
    TimerSync {
        remaining_seconds: u32,
    },
    ScoreUpdate {
        score: u32,
    },
}

/// One entry of the append-only game feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    #[serde(default)]
    pub actor_id: PlayerId,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Per-sender sequence number, starting at 1
    #[serde(default)]
    pub seq: u64,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PlayerStats>,
}

/// Seed for `player`'s board in a room seeded with `room_seed`
pub fn board_seed(room_seed: u64, player: &PlayerId) -> u64 {
    let (high, low) = player.as_u64_pair();
    room_seed ^ high ^ low.rotate_left(17)
}
