//! Rate-limit metadata carried on HTTP responses.

use reqwest::header::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::BucketUpdate;

pub const REMAINING: &str = "x-ratelimit-remaining";
pub const LIMIT: &str = "x-ratelimit-limit";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const RESET: &str = "x-ratelimit-reset";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const RETRY_AFTER: &str = "retry-after";

/// Fallback wait for a 429 that carries no timing header at all.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Parsed rate-limit headers. Every field is optional because routes without a
/// bucket omit them entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    /// Relative reset, from `X-RateLimit-Reset-After` or derived from the absolute
    /// `X-RateLimit-Reset` when only that one is present.
    pub reset_after: Option<Duration>,
    pub retry_after: Option<Duration>,
    pub global: bool,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_headers_at(headers, SystemTime::now())
    }

    /// Parse relative to `now`, which only matters for the absolute reset header.
    pub fn from_headers_at(headers: &HeaderMap, now: SystemTime) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let seconds = |name: &str| {
            text(name)
                .and_then(|v| v.parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        };

        let reset_after = seconds(RESET_AFTER).or_else(|| {
            let reset_at = UNIX_EPOCH + seconds(RESET)?;
            Some(reset_at.duration_since(now).unwrap_or(Duration::ZERO))
        });

        Self {
            remaining: text(REMAINING).and_then(|v| v.parse().ok()),
            limit: text(LIMIT).and_then(|v| v.parse().ok()),
            reset_after,
            retry_after: seconds(RETRY_AFTER),
            global: text(GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }

    /// Complete bucket state, if the response carried all three parts.
    pub fn bucket_update(&self) -> Option<BucketUpdate> {
        Some(BucketUpdate {
            remaining: self.remaining?,
            limit: self.limit?,
            reset_in: self.reset_after?,
        })
    }

    /// How long a 429 asks us to hold off.
    pub fn retry_delay(&self) -> Duration {
        self.retry_after.or(self.reset_after).unwrap_or(DEFAULT_RETRY_AFTER)
    }
}
