//! Gem Duel - match-3 battle engine with peer board replication
//!
//! - `game`: grid rules, combo economy, attacks, battle clock, practice AI
//! - `replication`: room lifecycle and event feed sync between two peers
//! - `store`: backend collaborator traits and the in-memory backend
//! - `matchmaking`: lobby and quick match

pub mod app;
pub mod config;
pub mod game;
pub mod matchmaking;
pub mod replication;
pub mod store;
pub mod util;
