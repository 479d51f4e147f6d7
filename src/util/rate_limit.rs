//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified actions per second
pub fn create_limiter(actions_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(actions_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Default cap on local swaps/attack casts per second
pub const ACTION_RATE_LIMIT: u32 = 10;

/// Per-session limiter for local player actions
#[derive(Clone)]
pub struct ActionRateLimiter {
    limiter: Arc<Limiter>,
}

impl ActionRateLimiter {
    pub fn new(actions_per_second: u32) -> Self {
        Self {
            limiter: create_limiter(actions_per_second),
        }
    }

    /// Check if a local action is allowed (returns true if allowed)
    pub fn check_action(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for ActionRateLimiter {
    fn default() -> Self {
        Self::new(ACTION_RATE_LIMIT)
    }
}
