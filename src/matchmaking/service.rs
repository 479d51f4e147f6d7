//! Lobby - room creation, joining and quick match

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::notice::MatchView;
use crate::app::state::Backend;
use crate::config::GameConfig;
use crate::replication::protocol::{PlayerId, Room};
use crate::replication::session::{Session, SessionHandle};
use crate::replication::SessionError;

/// One player's entry point before a session exists
pub struct Lobby {
    backend: Backend,
    player_id: PlayerId,
    config: GameConfig,
    /// Seed for rooms this player creates, random when unset
    seed: Option<u64>,
}

impl Lobby {
    pub fn new(backend: Backend, player_id: PlayerId, config: GameConfig) -> Self {
        Self {
            backend,
            player_id,
            config,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    fn room_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    pub async fn create_room(&self, is_private: bool) -> Result<Room, SessionError> {
        let room = self
            .backend
            .rooms
            .create(self.player_id, is_private, self.room_seed())
            .await?;
        Ok(room)
    }

    /// Join by code, or any open public room. Ok(None) when nothing fits.
    pub async fn join_room(&self, code: Option<&str>) -> Result<Option<Room>, SessionError> {
        let room = self.backend.rooms.join(self.player_id, code).await?;
        if room.is_none() {
            info!(player = %self.player_id, code = ?code, "No joinable room");
        }
        Ok(room)
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<(), SessionError> {
        self.backend.rooms.leave(room_id, self.player_id).await?;
        Ok(())
    }

    /// Queue up and resolve to a room with an opponent seated.
    ///
    /// Whoever finds a partner in the queue hosts a public room, seats the
    /// partner and hands them the room id. Everyone else waits for that.
    pub async fn quick_match(&self) -> Result<Room, SessionError> {
        let queue = &self.backend.queue;
        let mut assignments = queue.subscribe_for_match(self.player_id);
        queue.enqueue(self.player_id).await?;

        if let Some(partner) = queue.find_candidate(self.player_id).await? {
            let room = self
                .backend
                .rooms
                .create(self.player_id, false, self.room_seed())
                .await?;
            let seated = self.backend.rooms.join(partner, Some(&room.id)).await?;
            queue.assign_match(partner, &room.id).await?;
            info!(player = %self.player_id, partner = %partner, room_id = %room.id, "Quick match hosted");
            return Ok(seated.unwrap_or(room));
        }

        while let Some(assigned) = assignments.next().await {
            let Some(room_id) = assigned else {
                continue;
            };
            // Already seated by the host; joining again just reads the room back
            match self.backend.rooms.join(self.player_id, Some(&room_id)).await? {
                Some(room) => {
                    info!(player = %self.player_id, room_id = %room.id, "Quick match found");
                    return Ok(room);
                }
                None => warn!(player = %self.player_id, room_id = %room_id, "Assigned room vanished"),
            }
        }
        Err(SessionError::Closed)
    }

    pub async fn cancel_quick_match(&self) -> Result<(), SessionError> {
        self.backend.queue.dequeue(self.player_id).await?;
        Ok(())
    }

    /// Start the session for a room this player sits in
    pub fn enter(&self, room: Room) -> (SessionHandle, JoinHandle<MatchView>) {
        Session::spawn(self.backend.clone(), self.player_id, room, &self.config)
    }
}
