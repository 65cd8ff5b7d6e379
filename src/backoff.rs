//! Backoff schedules for gateway reconnects and request retries.
//!
//! Attempt `0` is the first try after a healthy session and never waits, so a gateway
//! that loses an established stream reconnects immediately. Each further consecutive
//! failure moves one step along the schedule.
//!
//! ```rust
//! use std::time::Duration;
//! use cordwire::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(500))
//!     .with_max(Duration::from_secs(4))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(500));
//! assert_eq!(backoff.delay(3), Duration::from_secs(2));
//! assert_eq!(backoff.delay(9), Duration::from_secs(4));
//! ```

use std::time::Duration;

/// Ceiling applied when a schedule would overflow (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned when configuring a backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Constant(Duration),
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule indexed by consecutive failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
}

impl Backoff {
    /// Same delay for every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant(delay) }
    }

    /// No delay at all; retries re-enter admission straight away.
    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    /// Doubling delay starting at `base`.
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential { base, max: None } }
    }

    /// Cap an exponential schedule.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.schedule {
            Schedule::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            Schedule::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before attempt number `attempt` (0 = no delay).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.schedule {
            Schedule::Constant(delay) => delay,
            Schedule::Exponential { base, max } => {
                let multiplier = 2u128.saturating_pow(attempt - 1);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let raw = Duration::from_nanos(nanos as u64);
                max.map_or(raw, |m| raw.min(m))
            }
        };
        delay.min(MAX_BACKOFF)
    }
}
