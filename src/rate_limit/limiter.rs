use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::bucket::{Bucket, BucketSnapshot};
use super::{Admission, BucketKey, BucketUpdate};

/// Upper bound on how long the task sleeps when nothing is scheduled.
const IDLE_PARK: Duration = Duration::from_secs(3600);

enum Command {
    Admit { bucket: BucketKey, reply: oneshot::Sender<()> },
    Observe { bucket: BucketKey, update: BucketUpdate },
    GlobalCooldown { reset_in: Duration },
    Snapshot { bucket: BucketKey, reply: oneshot::Sender<Option<BucketSnapshot>> },
    GlobalUntil { reply: oneshot::Sender<Option<Instant>> },
}

/// Handle to the rate limiter task.
///
/// Construct one per client with [`RateLimiter::spawn`] and clone it into every
/// component that sends requests. The task exits once the last handle is dropped.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tx: mpsc::UnboundedSender<Command>,
}

/// A place in a bucket's queue, taken synchronously so arrival order is fixed
/// before any waiting starts.
#[derive(Debug)]
pub struct Ticket {
    bucket: BucketKey,
    rx: Option<oneshot::Receiver<()>>,
}

impl Ticket {
    pub fn bucket(&self) -> &BucketKey {
        &self.bucket
    }

    /// Wait up to `max_wait` for the grant.
    pub async fn wait(self, max_wait: Duration) -> Admission {
        let Some(rx) = self.rx else {
            return Admission::Dropped;
        };
        match tokio::time::timeout(max_wait, rx).await {
            Ok(Ok(())) => Admission::Granted,
            Ok(Err(_)) => {
                tracing::warn!(bucket = %self.bucket, "rate limiter stopped while request was held");
                Admission::Dropped
            }
            Err(_) => {
                tracing::debug!(bucket = %self.bucket, ?max_wait, "admission timed out, dropping request");
                Admission::Dropped
            }
        }
    }
}

impl RateLimiter {
    /// Start the limiter task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = LimiterTask { rx, buckets: HashMap::new(), global_until: None };
        tokio::spawn(task.run());
        Self { tx }
    }

    /// Join the bucket's queue without waiting yet.
    pub fn reserve(&self, bucket: &BucketKey) -> Ticket {
        let (reply, rx) = oneshot::channel();
        let rx = self.tx.send(Command::Admit { bucket: bucket.clone(), reply }).ok().map(|_| rx);
        Ticket { bucket: bucket.clone(), rx }
    }

    /// Wait for capacity in `bucket`, giving up after `max_wait`.
    pub async fn admit(&self, bucket: &BucketKey, max_wait: Duration) -> Admission {
        self.reserve(bucket).wait(max_wait).await
    }

    /// Record the bucket state reported by a completed response.
    pub fn observe(&self, bucket: &BucketKey, update: BucketUpdate) {
        let _ = self.tx.send(Command::Observe { bucket: bucket.clone(), update });
    }

    /// Hold every bucket for `reset_in`.
    pub fn trigger_global_cooldown(&self, reset_in: Duration) {
        let _ = self.tx.send(Command::GlobalCooldown { reset_in });
    }

    /// Current view of a bucket, `None` if nothing is known about it.
    pub async fn snapshot(&self, bucket: &BucketKey) -> Option<BucketSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { bucket: bucket.clone(), reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// End of the active global cooldown, if any.
    pub async fn global_cooldown_until(&self) -> Option<Instant> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::GlobalUntil { reply }).ok()?;
        rx.await.ok().flatten()
    }
}

struct LimiterTask {
    rx: mpsc::UnboundedReceiver<Command>,
    buckets: HashMap<BucketKey, Bucket>,
    global_until: Option<Instant>,
}

impl LimiterTask {
    async fn run(mut self) {
        loop {
            self.release_ready(Instant::now());
            let wake = self.next_wake().unwrap_or_else(|| Instant::now() + IDLE_PARK);

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
        tracing::debug!("rate limiter stopped");
    }

    fn handle(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Admit { bucket, reply } => {
                self.buckets.entry(bucket).or_default().enqueue(reply);
            }
            Command::Observe { bucket, update } => {
                tracing::trace!(
                    bucket = %bucket,
                    remaining = update.remaining,
                    limit = update.limit,
                    reset_in = ?update.reset_in,
                    "bucket update"
                );
                self.buckets.entry(bucket).or_default().observe(update, now);
            }
            Command::GlobalCooldown { reset_in } => {
                let until = now + reset_in;
                if self.global_until.map_or(true, |current| until > current) {
                    tracing::warn!(?reset_in, "global rate limit hit, holding all buckets");
                    self.global_until = Some(until);
                }
            }
            Command::Snapshot { bucket, reply } => {
                let snapshot = self.buckets.get(&bucket).and_then(|b| b.snapshot(now));
                let _ = reply.send(snapshot);
            }
            Command::GlobalUntil { reply } => {
                let _ = reply.send(self.global_until.filter(|until| *until > now));
            }
        }
    }

    fn release_ready(&mut self, now: Instant) {
        if let Some(until) = self.global_until {
            if until > now {
                return;
            }
            tracing::info!("global rate limit cooldown over");
            self.global_until = None;
        }
        for (key, bucket) in self.buckets.iter_mut() {
            if bucket.has_waiters() {
                let released = bucket.release(now);
                if released > 0 {
                    tracing::trace!(bucket = %key, released, "released held requests");
                }
            }
        }
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
    }

    fn next_wake(&self) -> Option<Instant> {
        let held = self.buckets.values().any(Bucket::has_waiters);
        if let Some(until) = self.global_until {
            return held.then_some(until);
        }
        self.buckets.values().filter_map(Bucket::wake_at).min()
    }
}
