//! Jitter for reconnect and retry delays.
//!
//! Many clients losing the gateway at the same moment would otherwise reconnect in
//! lockstep. `Full` spreads each delay uniformly over `[0, delay]`.

use rand::{rng, Rng};
use std::time::Duration;

/// Randomization applied on top of a [`Backoff`](crate::Backoff) delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the backoff delay unchanged.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply with a caller-supplied RNG (deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
        }
    }
}
