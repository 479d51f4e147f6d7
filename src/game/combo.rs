//! Combo tracking - turns match timing and size into earned attacks

use std::collections::VecDeque;

use super::attack::AttackKind;

/// How long a match counts toward combos
pub const COMBO_WINDOW_MS: u64 = 20_000;
/// Short window used by the RowBlocker rule
pub const SHORT_WINDOW_MS: u64 = 10_000;
/// Matches inside the full window that trigger board recovery
pub const RECOVERY_COMBOS: usize = 6;

/// Sliding window of recent matches for one board
#[derive(Debug, Clone, Default)]
pub struct ComboTracker {
    timestamps: VecDeque<u64>,
    last_match_size: usize,
    /// Matches at or before this instant already paid out an attack
    earned_floor: Option<u64>,
    now_ms: u64,
}

impl ComboTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a match made at `now_ms`
    pub fn record(&mut self, match_size: usize, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        self.timestamps.push_back(now_ms);
        let cutoff = self.now_ms.saturating_sub(COMBO_WINDOW_MS);
        while self.timestamps.front().is_some_and(|&t| t < cutoff) {
            self.timestamps.pop_front();
        }
        self.last_match_size = match_size;
    }

    pub fn last_match_size(&self) -> usize {
        self.last_match_size
    }

    /// Matches recorded within `window_ms` of the latest match
    pub fn combos_in_last(&self, window_ms: u64) -> usize {
        let cutoff = self.now_ms.saturating_sub(window_ms);
        self.timestamps.iter().filter(|&&t| t >= cutoff).count()
    }

    fn earnable_in_last(&self, window_ms: u64) -> usize {
        let cutoff = self.now_ms.saturating_sub(window_ms);
        self.timestamps
            .iter()
            .filter(|&&t| t >= cutoff && self.earned_floor.map_or(true, |floor| t > floor))
            .count()
    }

    /// Strongest attack the recent matches pay for, if any
    ///
    /// A grant moves the earned floor so the same matches cannot pay twice,
    /// while recovery keeps counting them.
    pub fn check_for_earned_attack(&mut self) -> Option<AttackKind> {
        let size = self.last_match_size;
        let kind = if size >= 7 || self.earnable_in_last(COMBO_WINDOW_MS) >= 3 {
            AttackKind::ColorWipe
        } else if size >= 6 || self.earnable_in_last(SHORT_WINDOW_MS) >= 2 {
            AttackKind::RowBlocker
        } else if size >= 5 {
            AttackKind::BlockBomb
        } else {
            return None;
        };

        self.earned_floor = Some(self.now_ms);
        self.last_match_size = 0;
        Some(kind)
    }

    pub fn check_for_board_recovery(&self) -> bool {
        self.combos_in_last(COMBO_WINDOW_MS) >= RECOVERY_COMBOS
    }

    pub fn reset(&mut self) {
        self.timestamps.clear();
        self.last_match_size = 0;
        self.earned_floor = None;
    }
}
