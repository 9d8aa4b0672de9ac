//! Append-only persistence outbox
//!
//! Writes are fire-and-forget from the trading loop's point of view: a
//! record goes into the outbox and the loop moves on. The outbox drains into
//! the sink opportunistically, and when the sink fails it holds everything
//! in arrival order and retries on an exponential backoff schedule. Replay
//! safety comes from the sink's idempotent upserts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::persistence::{PersistRecord, PersistenceSink};

pub struct Outbox {
    pending: VecDeque<PersistRecord>,
    base_delay: Duration,
    max_delay: Duration,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
    total_enqueued: u64,
    total_flushed: u64,
}

impl Outbox {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            base_delay,
            max_delay,
            consecutive_failures: 0,
            next_retry_at: None,
            total_enqueued: 0,
            total_flushed: 0,
        }
    }

    pub fn enqueue(&mut self, record: PersistRecord) {
        self.total_enqueued += 1;
        self.pending.push_back(record);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn total_flushed(&self) -> u64 {
        self.total_flushed
    }

    /// True when a failure has scheduled a retry that is still in the
    /// future.
    pub fn backing_off(&self) -> bool {
        self.next_retry_at.map(|t| t > Instant::now()).unwrap_or(false)
    }

    /// Drain as much as the sink will take right now. Returns the number of
    /// records written. Honors the backoff schedule; never blocks.
    pub fn flush(&mut self, sink: &mut dyn PersistenceSink) -> usize {
        if self.backing_off() {
            return 0;
        }
        self.drain(sink)
    }

    /// Drain ignoring the backoff schedule. Used at session end, where one
    /// last attempt is worth making regardless of the timer.
    pub fn flush_now(&mut self, sink: &mut dyn PersistenceSink) -> usize {
        self.drain(sink)
    }

    fn drain(&mut self, sink: &mut dyn PersistenceSink) -> usize {
        let mut written = 0;
        while let Some(record) = self.pending.front() {
            match sink.upsert(record) {
                Ok(()) => {
                    self.pending.pop_front();
                    written += 1;
                    self.total_flushed += 1;
                    self.consecutive_failures = 0;
                    self.next_retry_at = None;
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    let exp = self.consecutive_failures.saturating_sub(1).min(16);
                    let delay = self
                        .base_delay
                        .saturating_mul(1u32 << exp)
                        .min(self.max_delay);
                    self.next_retry_at = Some(Instant::now() + delay);
                    tracing::warn!(
                        pending = self.pending.len(),
                        failures = self.consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "persistence sink unavailable; buffering"
                    );
                    break;
                }
            }
        }
        written
    }
}
