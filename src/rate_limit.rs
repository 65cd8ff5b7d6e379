//! Two-level (global + per-bucket) rate limiting driven by server headers.
//!
//! - [`RateLimiter`]: cloneable handle to the single limiter task that owns all
//!   bucket and cooldown state.
//! - [`headers`]: extraction of bucket metadata from response headers.
//! - [`Admission`]: outcome of waiting for capacity.
//!
//! # Model
//!
//! The server is authoritative. A bucket the limiter has never heard about admits
//! freely; once a response reports `remaining`, at most that many requests are let
//! through until a newer response arrives. When the reset instant passes first, the
//! window refills to the last reported `limit`, never more.
//! A global cooldown holds every bucket, whatever its own capacity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

mod bucket;
pub mod headers;
mod limiter;

pub use bucket::BucketSnapshot;
pub use headers::RateLimitHeaders;
pub use limiter::{RateLimiter, Ticket};

/// Identifies a server-side rate-limit domain: the route shape, not the concrete URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(Arc<str>);

impl BucketKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Bucket state reported by one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketUpdate {
    /// Requests left in the current window.
    pub remaining: u32,
    /// Window size.
    pub limit: u32,
    /// Time until the window resets.
    pub reset_in: Duration,
}

/// Result of waiting for capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may be sent now.
    Granted,
    /// The wait exceeded its deadline. The request must not be sent.
    Dropped,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}
