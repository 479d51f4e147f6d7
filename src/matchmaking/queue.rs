//! Quick match queue

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::replication::protocol::PlayerId;

/// Player waiting for an opponent
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub player_id: PlayerId,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// FIFO of players looking for a 1v1
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<QueuedPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the back of the queue
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        // Rejoin moves to the back
        self.queue.retain(|p| p.player_id != player.player_id);
        self.queue.push_back(player);
    }

    pub fn dequeue(&mut self, player_id: PlayerId) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.player_id == player_id)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.queue.iter().any(|p| &p.player_id == player_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take `player` and the longest waiting other player out of the queue.
    /// Nothing changes unless both are present.
    pub fn try_pair(&mut self, player: PlayerId) -> Option<(QueuedPlayer, QueuedPlayer)> {
        if !self.contains(&player) {
            return None;
        }
        let candidate = self.queue.iter().find(|p| p.player_id != player)?.player_id;
        let me = self.dequeue(player)?;
        let other = self.dequeue(candidate)?;
        Some((me, other))
    }
}
