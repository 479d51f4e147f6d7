//! Scripted opponent for practice matches

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::attack::AttackInventory;
use super::grid::{GemGrid, Position};

/// What the opponent wants to do this turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiAction {
    Swap(Position, Position),
    Attack(usize),
    /// No legal move and nothing to cast
    Wait,
}

/// Picks legal moves on a jittered cadence
#[derive(Debug, Clone)]
pub struct AiOpponent {
    rng: ChaCha8Rng,
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl AiOpponent {
    pub fn new(seed: u64, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            min_delay_ms: min_delay_ms.min(max_delay_ms),
            max_delay_ms,
        }
    }

    /// Think time before the next action
    pub fn next_delay(&mut self) -> Duration {
        Duration::from_millis(self.rng.gen_range(self.min_delay_ms..=self.max_delay_ms))
    }

    /// A random matching swap, if the board has one
    pub fn choose_move(&mut self, grid: &GemGrid) -> Option<(Position, Position)> {
        grid.legal_moves().choose(&mut self.rng).copied()
    }

    /// Cast whatever is ready, otherwise play
    pub fn decide(&mut self, grid: &GemGrid, inventory: &AttackInventory) -> AiAction {
        if let Some(slot) = inventory.first_filled() {
            return AiAction::Attack(slot);
        }
        match self.choose_move(grid) {
            Some((a, b)) => AiAction::Swap(a, b),
            None => AiAction::Wait,
        }
    }
}
