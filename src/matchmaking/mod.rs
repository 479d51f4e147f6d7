//! Matchmaking - the quick match queue and the per-player lobby

pub mod queue;
pub mod service;

pub use queue::MatchmakingQueue;
pub use service::Lobby;
