use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::BucketUpdate;

/// Point-in-time view of one bucket, as presented to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    /// Capacity left before the limiter starts holding requests. Never negative.
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: Instant,
    /// Requests currently held for this bucket.
    pub queued: usize,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    remaining: u32,
    limit: u32,
    reset_at: Instant,
    /// Window length as last reported, used to roll the window over unobserved.
    period: Duration,
}

/// One bucket's server-reported window plus the FIFO of held requests.
#[derive(Debug, Default)]
pub(super) struct Bucket {
    window: Option<Window>,
    /// Grants handed out since the last server report.
    granted: u32,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Bucket {
    /// Last writer wins: the newest response replaces whatever was known.
    pub(super) fn observe(&mut self, update: BucketUpdate, now: Instant) {
        self.window = Some(Window {
            remaining: update.remaining,
            limit: update.limit,
            reset_at: now + update.reset_in,
            period: update.reset_in,
        });
        self.granted = 0;
    }

    pub(super) fn enqueue(&mut self, waiter: oneshot::Sender<()>) {
        self.waiters.push_back(waiter);
    }

    /// Hand out grants in arrival order while capacity lasts. Waiters that already
    /// gave up are skipped without consuming capacity.
    pub(super) fn release(&mut self, now: Instant) -> usize {
        let mut released = 0;
        while self.has_capacity(now) {
            let Some(waiter) = self.waiters.pop_front() else { break };
            if waiter.send(()).is_ok() {
                if self.window.is_some() {
                    self.granted += 1;
                }
                released += 1;
            }
        }
        released
    }

    /// When the held queue can next make progress on its own.
    pub(super) fn wake_at(&self) -> Option<Instant> {
        if self.waiters.is_empty() {
            return None;
        }
        self.window.map(|w| w.reset_at)
    }

    pub(super) fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    /// Nothing known and nothing held: safe to forget.
    pub(super) fn is_idle(&self, now: Instant) -> bool {
        self.waiters.is_empty() && self.window.map_or(true, |w| w.reset_at <= now)
    }

    pub(super) fn snapshot(&self, now: Instant) -> Option<BucketSnapshot> {
        let w = self.window.filter(|w| w.reset_at > now)?;
        Some(BucketSnapshot {
            remaining: w.remaining.saturating_sub(self.granted),
            limit: w.limit,
            reset_at: w.reset_at,
            queued: self.waiters.len(),
        })
    }

    fn has_capacity(&mut self, now: Instant) -> bool {
        let Some(w) = self.window.as_mut() else {
            return true;
        };
        if w.reset_at <= now {
            self.granted = 0;
            if w.period.is_zero() {
                self.window = None;
                return true;
            }
            // Rolled over without a report: refill to the known limit, at least one
            // request so a fresh response can report in.
            w.remaining = w.limit.max(1);
            w.reset_at = now + w.period;
        }
        self.granted < w.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(remaining: u32, reset_secs: u64) -> BucketUpdate {
        BucketUpdate { remaining, limit: 5, reset_in: Duration::from_secs(reset_secs) }
    }

    #[test]
    fn unknown_bucket_releases_everyone() {
        let now = Instant::now();
        let mut bucket = Bucket::default();
        let mut rxs = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            bucket.enqueue(tx);
            rxs.push(rx);
        }
        assert_eq!(bucket.release(now), 3);
        assert!(!bucket.has_waiters());
    }

    #[test]
    fn capacity_is_bounded_by_reported_remaining() {
        let now = Instant::now();
        let mut bucket = Bucket::default();
        bucket.observe(update(2, 10), now);
        let mut rxs = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            bucket.enqueue(tx);
            rxs.push(rx);
        }
        assert_eq!(bucket.release(now), 2);
        assert_eq!(bucket.snapshot(now).map(|s| s.remaining), Some(0));
        assert_eq!(bucket.wake_at(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn abandoned_waiters_do_not_use_capacity() {
        let now = Instant::now();
        let mut bucket = Bucket::default();
        bucket.observe(update(1, 10), now);
        let (gone, gone_rx) = oneshot::channel();
        drop(gone_rx);
        bucket.enqueue(gone);
        let (live, mut live_rx) = oneshot::channel();
        bucket.enqueue(live);
        assert_eq!(bucket.release(now), 1);
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn elapsed_window_refills_to_the_known_limit() {
        let now = Instant::now();
        let mut bucket = Bucket::default();
        bucket.observe(BucketUpdate { remaining: 0, limit: 2, reset_in: Duration::from_secs(1) }, now);
        let mut rxs = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = oneshot::channel();
            bucket.enqueue(tx);
            rxs.push(rx);
        }
        assert_eq!(bucket.release(now), 0);

        let later = now + Duration::from_secs(1);
        assert_eq!(bucket.release(later), 2);
        assert_eq!(bucket.release(later), 0);
        assert_eq!(bucket.wake_at(), Some(later + Duration::from_secs(1)));
        assert_eq!(bucket.snapshot(later).map(|s| (s.remaining, s.queued)), Some((0, 3)));
    }

    #[test]
    fn unknown_limit_refills_one_at_a_time() {
        let now = Instant::now();
        let mut bucket = Bucket::default();
        bucket.observe(BucketUpdate { remaining: 0, limit: 0, reset_in: Duration::from_secs(2) }, now);
        let mut rxs = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            bucket.enqueue(tx);
            rxs.push(rx);
        }
        assert_eq!(bucket.release(now + Duration::from_secs(2)), 1);
    }

    #[test]
    fn zero_length_window_forgets_the_bucket() {
        let now = Instant::now();
        let mut bucket = Bucket::default();
        bucket.observe(BucketUpdate { remaining: 0, limit: 5, reset_in: Duration::ZERO }, now);
        let (tx, _rx) = oneshot::channel();
        bucket.enqueue(tx);
        assert_eq!(bucket.release(now), 1);
        assert!(bucket.is_idle(now));
    }
}
