//! Presentation-facing notifications and read-only match views

use serde::Serialize;

use crate::game::{
    Attack, AttackKind, BattleClock, BattleState, BoardSnapshot, PlayerBoard, PlayerStats, Side,
    INVENTORY_SLOTS,
};
use crate::replication::protocol::{PlayerId, Room};

/// How the battle ended from the local player's seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleOutcome {
    Won,
    Lost,
    Draw,
}

impl BattleOutcome {
    pub fn from_side(winner: Option<Side>) -> Self {
        match winner {
            Some(Side::Local) => BattleOutcome::Won,
            Some(Side::Opponent) => BattleOutcome::Lost,
            None => BattleOutcome::Draw,
        }
    }

    pub fn from_winner(winner: Option<PlayerId>, me: &PlayerId) -> Self {
        match winner {
            Some(id) if &id == me => BattleOutcome::Won,
            Some(_) => BattleOutcome::Lost,
            None => BattleOutcome::Draw,
        }
    }
}

/// Everything the UI layer is told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    RoomChanged { room: Room },
    GameStarted { seed: u64 },
    Countdown { value: u32 },
    BattleStarted,
    TimeRemaining { seconds: u32, urgent: bool },
    LocalBoardChanged,
    OpponentBoardChanged,
    AttackEarned { kind: AttackKind, slot: usize },
    AttackReceived { kind: AttackKind },
    BoardRecovered,
    OpponentDisconnected,
    OpponentReconnected,
    Paused { reason: String },
    Resumed,
    /// Mirror diverged and was replaced by the owner's snapshot
    MirrorResynced,
    BattleFinished {
        outcome: BattleOutcome,
        local: PlayerStats,
        opponent: PlayerStats,
    },
    RoomGone,
}

/// Point-in-time copy of one side's board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardView {
    pub snapshot: BoardSnapshot,
    pub inventory: [Option<Attack>; INVENTORY_SLOTS],
}

impl BoardView {
    pub fn of(board: &PlayerBoard) -> Self {
        Self {
            snapshot: board.grid.snapshot(),
            inventory: *board.inventory().slots(),
        }
    }
}

/// Point-in-time copy of a running match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchView {
    pub state: BattleState,
    pub remaining_seconds: u32,
    pub countdown: u32,
    pub local_stats: PlayerStats,
    pub opponent_stats: PlayerStats,
    pub local: Option<BoardView>,
    pub opponent: Option<BoardView>,
    pub opponent_disconnected: bool,
    /// Set once the battle is over
    pub outcome: Option<BattleOutcome>,
}

impl MatchView {
    pub fn new(clock: &BattleClock, local: Option<&PlayerBoard>, opponent: Option<&PlayerBoard>) -> Self {
        Self {
            state: clock.state(),
            remaining_seconds: clock.remaining_seconds(),
            countdown: clock.countdown_value(),
            local_stats: clock.local,
            opponent_stats: clock.opponent,
            local: local.map(BoardView::of),
            opponent: opponent.map(BoardView::of),
            opponent_disconnected: false,
            outcome: clock
                .is_finished()
                .then(|| BattleOutcome::from_side(clock.winner())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == BattleState::Finished
    }

    pub fn state_allows_moves(&self) -> bool {
        self.state == BattleState::Active
    }
}
