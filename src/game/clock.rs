//! Battle clock - countdown, timed battle, pause accounting and the final verdict

use serde::{Deserialize, Serialize};
use tracing::info;

use super::grid::TurnOutcome;
use crate::config::GameConfig;

/// Remaining time at or under which the battle is urgent
pub const URGENT_SECONDS: u32 = 10;
/// TimerSync drift tolerated before adopting the host's time
pub const MAX_TIMER_DRIFT_SECS: u32 = 2;

/// Per-player counters for one battle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStats {
    pub score: u32,
    pub total_matches: u32,
    /// Most cascade passes in a single turn
    pub biggest_combo: u32,
    pub attacks_used: u32,
    pub attacks_earned: u32,
}

impl PlayerStats {
    /// Fold a scoring turn into the counters
    pub fn record_turn(&mut self, outcome: &TurnOutcome) {
        if !outcome.is_scoring() {
            return;
        }
        self.score += outcome.score;
        self.total_matches += 1;
        self.biggest_combo = self.biggest_combo.max(outcome.passes());
    }
}

/// Clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleState {
    /// Not started
    Waiting,
    /// Counting down to the start
    Countdown,
    /// Battle running
    Active,
    /// Battle frozen
    Paused,
    /// Time ran out
    Finished,
}

/// Which half of the stats a verdict refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Opponent,
}

/// What a clock tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    CountdownTick(u32),
    BattleStarted,
    Tick(u32),
    /// Emitted exactly once per battle
    Finished,
}

/// One battle's clock plus both players' stats
#[derive(Debug, Clone)]
pub struct BattleClock {
    state: BattleState,
    battle_seconds: u32,
    countdown_seconds: u32,
    remaining_seconds: u32,
    countdown_value: u32,
    battle_start_ms: Option<u64>,
    paused_at_ms: Option<u64>,
    paused_duration_ms: u64,
    active_ticks: u32,
    finish_reported: bool,
    pub local: PlayerStats,
    pub opponent: PlayerStats,
}

impl BattleClock {
    pub fn new(battle_seconds: u32, countdown_seconds: u32) -> Self {
        Self {
            state: BattleState::Waiting,
            battle_seconds,
            countdown_seconds,
            remaining_seconds: battle_seconds,
            countdown_value: countdown_seconds,
            battle_start_ms: None,
            paused_at_ms: None,
            paused_duration_ms: 0,
            active_ticks: 0,
            finish_reported: false,
            local: PlayerStats::default(),
            opponent: PlayerStats::default(),
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.battle_seconds, config.countdown_seconds)
    }

    pub fn state(&self) -> BattleState {
        self.state
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn countdown_value(&self) -> u32 {
        self.countdown_value
    }

    pub fn battle_start_ms(&self) -> Option<u64> {
        self.battle_start_ms
    }

    /// Seconds spent Active so far
    pub fn active_ticks(&self) -> u32 {
        self.active_ticks
    }

    /// Total time spent paused, including a pause still in progress
    pub fn paused_duration_ms(&self, now_ms: u64) -> u64 {
        let open = self
            .paused_at_ms
            .map(|at| now_ms.saturating_sub(at))
            .unwrap_or(0);
        self.paused_duration_ms + open
    }

    pub fn is_urgent(&self) -> bool {
        self.remaining_seconds <= URGENT_SECONDS
    }

    pub fn can_make_move(&self) -> bool {
        self.state == BattleState::Active
    }

    pub fn is_finished(&self) -> bool {
        self.state == BattleState::Finished
    }

    /// Begin the countdown. Only valid from Waiting.
    pub fn start_countdown(&mut self, now_ms: u64) -> bool {
        if self.state != BattleState::Waiting {
            return false;
        }
        self.countdown_value = self.countdown_seconds;
        if self.countdown_value == 0 {
            self.activate(now_ms);
        } else {
            self.state = BattleState::Countdown;
        }
        true
    }

    fn activate(&mut self, now_ms: u64) {
        self.state = BattleState::Active;
        self.battle_start_ms = Some(now_ms);
        self.remaining_seconds = self.battle_seconds;
        self.active_ticks = 0;
        info!(battle_seconds = self.battle_seconds, "Battle started");
    }

    /// The 1 Hz callback for both the countdown and the battle timer
    pub fn tick(&mut self, now_ms: u64) -> Option<ClockEvent> {
        match self.state {
            BattleState::Countdown => {
                self.countdown_value = self.countdown_value.saturating_sub(1);
                if self.countdown_value == 0 {
                    self.activate(now_ms);
                    Some(ClockEvent::BattleStarted)
                } else {
                    Some(ClockEvent::CountdownTick(self.countdown_value))
                }
            }
            BattleState::Active => {
                self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
                self.active_ticks += 1;
                if self.remaining_seconds == 0 {
                    self.state = BattleState::Finished;
                    self.report_finish()
                } else {
                    Some(ClockEvent::Tick(self.remaining_seconds))
                }
            }
            BattleState::Waiting | BattleState::Paused | BattleState::Finished => None,
        }
    }

    fn report_finish(&mut self) -> Option<ClockEvent> {
        if self.finish_reported {
            return None;
        }
        self.finish_reported = true;
        info!(
            local_score = self.local.score,
            opponent_score = self.opponent.score,
            "Battle finished"
        );
        Some(ClockEvent::Finished)
    }

    /// End the battle because the peer already did. Never reports Finished.
    pub fn finish_externally(&mut self, now_ms: u64) -> bool {
        if self.state == BattleState::Finished {
            return false;
        }
        self.close_pause(now_ms);
        self.state = BattleState::Finished;
        self.finish_reported = true;
        true
    }

    /// End the battle now (forfeit), reporting Finished if not yet reported
    pub fn finish_now(&mut self, now_ms: u64) -> Option<ClockEvent> {
        if self.state == BattleState::Finished {
            return None;
        }
        self.close_pause(now_ms);
        self.state = BattleState::Finished;
        self.report_finish()
    }

    pub fn pause(&mut self, now_ms: u64) -> bool {
        if self.state != BattleState::Active {
            return false;
        }
        self.state = BattleState::Paused;
        self.paused_at_ms = Some(now_ms);
        true
    }

    pub fn resume(&mut self, now_ms: u64) -> bool {
        if self.state != BattleState::Paused {
            return false;
        }
        self.close_pause(now_ms);
        self.state = BattleState::Active;
        true
    }

    fn close_pause(&mut self, now_ms: u64) {
        if let Some(at) = self.paused_at_ms.take() {
            self.paused_duration_ms += now_ms.saturating_sub(at);
        }
    }

    /// Adopt the host's remaining time when drift exceeds the tolerance
    pub fn sync_remaining(&mut self, remote_seconds: u32) -> bool {
        if !matches!(self.state, BattleState::Active | BattleState::Paused) {
            return false;
        }
        if self.remaining_seconds.abs_diff(remote_seconds) <= MAX_TIMER_DRIFT_SECS {
            return false;
        }
        self.remaining_seconds = remote_seconds.min(self.battle_seconds);
        true
    }

    /// Higher score wins; ties and unfinished battles have no winner
    pub fn winner(&self) -> Option<Side> {
        if self.state != BattleState::Finished {
            return None;
        }
        match self.local.score.cmp(&self.opponent.score) {
            std::cmp::Ordering::Greater => Some(Side::Local),
            std::cmp::Ordering::Less => Some(Side::Opponent),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Back to Waiting with zeroed stats
    pub fn reset(&mut self) {
        *self = Self::new(self.battle_seconds, self.countdown_seconds);
    }
}

impl Default for BattleClock {
    fn default() -> Self {
        Self::from_config(&GameConfig::default())
    }
}
