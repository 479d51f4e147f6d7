//! Collaborator interfaces for the shared room/event store
//!
//! The battle core never talks to a transport directly. A backend exposes
//! the room directory, the per-room event feed, heartbeats and the quick
//! match queue through these traits; `memory` is the in-process one.

pub mod memory;

pub use memory::MemoryBackend;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::replication::protocol::{GameEvent, PlayerId, Room, RoomUpdate};

/// Number of most recent events a feed subscription delivers
pub const FEED_WINDOW: usize = 50;

pub type BackendResult<T> = Result<T, BackendError>;

/// Room store and feed errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable")]
    Unavailable,

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("player {player} is not in room {room}")]
    NotInRoom { room: String, player: PlayerId },

    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared room records keyed by room id
pub trait RoomDirectory: Send + Sync {
    /// Create a room with `host` seated. Private rooms get a 6-digit code.
    fn create(&self, host: PlayerId, is_private: bool, seed: u64) -> BoxFuture<'_, BackendResult<Room>>;

    /// Join by code, or any open public room when `code` is None.
    /// Ok(None) when nothing joinable was found.
    fn join<'a>(
        &'a self,
        player: PlayerId,
        code: Option<&'a str>,
    ) -> BoxFuture<'a, BackendResult<Option<Room>>>;

    /// Current record first, then every change. None once the room is deleted.
    fn subscribe(&self, room_id: &str) -> BoxStream<'static, Option<Room>>;

    fn set_ready<'a>(
        &'a self,
        room_id: &'a str,
        player: PlayerId,
        ready: bool,
    ) -> BoxFuture<'a, BackendResult<()>>;

    fn leave<'a>(&'a self, room_id: &'a str, player: PlayerId) -> BoxFuture<'a, BackendResult<()>>;

    fn update_state<'a>(
        &'a self,
        room_id: &'a str,
        update: RoomUpdate,
    ) -> BoxFuture<'a, BackendResult<()>>;
}

/// Append-only per-room event log
pub trait EventFeed: Send + Sync {
    /// Append `event`; the store replaces its timestamp with its own
    fn publish<'a>(&'a self, room_id: &'a str, event: GameEvent) -> BoxFuture<'a, BackendResult<()>>;

    /// The latest `limit` events in order, redelivered on every append
    fn subscribe(&self, room_id: &str, limit: usize) -> BoxStream<'static, Vec<GameEvent>>;
}

/// Liveness stamps on the player record
pub trait Heartbeat: Send + Sync {
    fn touch<'a>(
        &'a self,
        room_id: &'a str,
        player: PlayerId,
        now_ms: u64,
    ) -> BoxFuture<'a, BackendResult<()>>;
}

/// Quick match queue
pub trait MatchQueue: Send + Sync {
    fn enqueue(&self, player: PlayerId) -> BoxFuture<'_, BackendResult<()>>;

    fn dequeue(&self, player: PlayerId) -> BoxFuture<'_, BackendResult<()>>;

    /// Pair `player` with the longest waiting other entry, removing both.
    /// Ok(None) when nobody else is queued or `player` was already claimed.
    fn find_candidate(&self, player: PlayerId) -> BoxFuture<'_, BackendResult<Option<PlayerId>>>;

    /// Tell a claimed player which room it was placed in
    fn assign_match<'a>(&'a self, player: PlayerId, room_id: &'a str) -> BoxFuture<'a, BackendResult<()>>;

    /// Room assignments for `player`, starting from None
    fn subscribe_for_match(&self, player: PlayerId) -> BoxStream<'static, Option<String>>;
}
