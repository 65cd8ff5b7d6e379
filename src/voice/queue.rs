use std::collections::VecDeque;

use crate::config::VoiceConfig;

/// Outgoing frame queue with one packet in flight at a time.
#[derive(Debug)]
pub struct SendQueue {
    pending: VecDeque<Vec<u8>>,
    in_flight: bool,
    config: VoiceConfig,
    burst: bool,
    /// Frames still owed by the producer for the last burst request.
    outstanding: Option<usize>,
}

impl SendQueue {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            pending: VecDeque::with_capacity(config.max_queue()),
            in_flight: false,
            config,
            burst: false,
            outstanding: None,
        }
    }

    /// Queue a frame, pushing out the oldest one when full.
    pub fn push(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        let dropped =
            if self.pending.len() >= self.config.max_queue() { self.pending.pop_front() } else { None };
        self.pending.push_back(frame);
        if let Some(owed) = self.outstanding.as_mut() {
            *owed = owed.saturating_sub(1);
            if *owed == 0 {
                self.outstanding = None;
            }
        }
        dropped
    }

    /// Next frame to put on the wire, if nothing is in flight.
    pub fn next_to_send(&mut self) -> Option<Vec<u8>> {
        if self.in_flight {
            return None;
        }
        let frame = self.pending.pop_front()?;
        self.in_flight = true;
        Some(frame)
    }

    /// The in-flight packet was written.
    pub fn ack(&mut self) {
        self.in_flight = false;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Nothing queued and nothing awaiting acknowledgement.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }

    pub fn set_burst(&mut self, enabled: bool) {
        self.burst = enabled;
        if !enabled {
            self.outstanding = None;
        }
    }

    /// How many frames to ask the producer for, if a request is due.
    pub fn burst_request(&mut self) -> Option<usize> {
        if !self.burst || self.outstanding.is_some() {
            return None;
        }
        let depth = self.pending.len();
        if depth >= self.config.send_request_threshold() {
            return None;
        }
        let count = self.config.max_burst().saturating_sub(depth);
        if count == 0 {
            return None;
        }
        self.outstanding = Some(count);
        Some(count)
    }
}
