//! Match-3 battle simulation

pub mod ai;
pub mod attack;
pub mod board;
pub mod clock;
pub mod combo;
pub mod grid;
pub mod practice;

pub use ai::{AiAction, AiOpponent};
pub use attack::{Attack, AttackEffect, AttackInventory, AttackKind, INVENTORY_SLOTS};
pub use board::{MoveResult, PlayerBoard};
pub use clock::{BattleClock, BattleState, ClockEvent, PlayerStats, Side};
pub use combo::ComboTracker;
pub use grid::{BoardSnapshot, Cell, GemColor, GemGrid, Position, TurnOutcome, BOARD_SIZE};
pub use practice::{PracticeCommand, PracticeMatch};
