//! Application wiring

pub mod notice;
pub mod state;

pub use notice::{BattleOutcome, MatchView, SessionNotice};
pub use state::{AppState, Backend};
