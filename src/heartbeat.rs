//! Heartbeat timer with zombie detection, shared by the gateway and voice
//! control sockets.

use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// The server asked for a heartbeat period tokio cannot schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("heartbeat interval must be positive")]
pub(crate) struct ZeroInterval;

#[derive(Debug, Default)]
pub(crate) struct Heartbeat {
    interval: Option<Interval>,
    awaiting_ack: bool,
}

impl Heartbeat {
    /// (Re)start beating every `period`, first beat one period from now.
    pub(crate) fn start(&mut self, period: Duration) -> Result<(), ZeroInterval> {
        if period.is_zero() {
            return Err(ZeroInterval);
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.awaiting_ack = false;
        Ok(())
    }

    /// Completes when the next beat is due. Never completes before `start`.
    pub(crate) async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    pub(crate) fn ack(&mut self) {
        self.awaiting_ack = false;
    }

    /// Record an outgoing beat. `false` means the previous one was never
    /// acknowledged and the connection should be treated as dead.
    pub(crate) fn beat(&mut self) -> bool {
        if self.awaiting_ack {
            return false;
        }
        self.awaiting_ack = true;
        true
    }
}
