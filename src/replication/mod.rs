//! Peer replication - room lifecycle, event feed sync and the session driver

pub mod controller;
pub mod protocol;
pub mod session;

pub use controller::{MultiplayerController, Outbound, PauseReason, SessionPhase};
pub use protocol::{GameEvent, PlayerId, Room, RoomState};
pub use session::{SessionCommand, SessionHandle};

use crate::store::BackendError;

/// Errors surfaced to callers of a multiplayer session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no room joined")]
    NotInitialized,

    #[error("session closed")]
    Closed,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}
