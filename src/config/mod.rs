//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;

use crate::util::rate_limit::ACTION_RATE_LIMIT;

/// Which headless match the binary runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Two sessions replicating over the in-memory backend
    Duel,
    /// Local board against the scripted opponent
    Practice,
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duel" => Ok(Self::Duel),
            "practice" => Ok(Self::Practice),
            _ => Err(ConfigError::Invalid("GEM_DUEL_MODE")),
        }
    }
}

/// Gameplay tuning handed to sessions and practice matches
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameConfig {
    /// Length of the battle in seconds
    pub battle_seconds: u32,
    /// Countdown before the battle starts
    pub countdown_seconds: u32,
    /// Lower bound of the scripted opponent's think time
    pub ai_min_delay_ms: u64,
    /// Upper bound of the scripted opponent's think time
    pub ai_max_delay_ms: u64,
    /// Local actions allowed per second
    pub action_rate_limit: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            battle_seconds: 90,
            countdown_seconds: 3,
            ai_min_delay_ms: 1_000,
            ai_max_delay_ms: 2_000,
            action_rate_limit: ACTION_RATE_LIMIT,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Which match to run
    pub mode: RunMode,
    /// Fixed room seed, random when unset
    pub seed: Option<u64>,
    /// Gameplay tuning
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = GameConfig::default();

        let game = GameConfig {
            battle_seconds: parse_or("BATTLE_SECONDS", defaults.battle_seconds)?,
            countdown_seconds: parse_or("COUNTDOWN_SECONDS", defaults.countdown_seconds)?,
            ai_min_delay_ms: parse_or("AI_MIN_DELAY_MS", defaults.ai_min_delay_ms)?,
            ai_max_delay_ms: parse_or("AI_MAX_DELAY_MS", defaults.ai_max_delay_ms)?,
            action_rate_limit: parse_or("ACTION_RATE_LIMIT", defaults.action_rate_limit)?,
        };

        if game.ai_min_delay_ms > game.ai_max_delay_ms {
            return Err(ConfigError::Invalid("AI_MIN_DELAY_MS"));
        }

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            mode: match env::var("GEM_DUEL_MODE") {
                Ok(raw) => raw.parse()?,
                Err(_) => RunMode::Duel,
            },
            seed: match env::var("GEM_DUEL_SEED") {
                Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("GEM_DUEL_SEED"))?),
                Err(_) => None,
            },
            game,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_parses_case_insensitively() {
        assert_eq!("Duel".parse::<RunMode>().unwrap(), RunMode::Duel);
        assert_eq!("PRACTICE".parse::<RunMode>().unwrap(), RunMode::Practice);
        assert!(matches!(
            "ranked".parse::<RunMode>(),
            Err(ConfigError::Invalid("GEM_DUEL_MODE"))
        ));
    }

    #[test]
    fn defaults_match_battle_rules() {
        let game = GameConfig::default();
        assert_eq!(game.battle_seconds, 90);
        assert_eq!(game.countdown_seconds, 3);
        assert!(game.ai_min_delay_ms <= game.ai_max_delay_ms);
    }
}
