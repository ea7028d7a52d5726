//! Global rate-limit gate
//!
//! When the server reports a global limit, every authenticated request is
//! parked here instead of entering its bucket. Parked requests are handed to
//! their buckets in order once the block expires.

use crate::bucket::{BucketGuard, SequentialBucket};
use crate::now_millis;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Cross-route backpressure owned by one handler
#[derive(Debug, Default)]
pub struct GlobalGate {
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    blocked: bool,
    /// Unix ms at which the block lifts
    until: i64,
    ready_queue: VecDeque<Parked>,
}

#[derive(Debug)]
struct Parked {
    bucket: Arc<SequentialBucket>,
    priority: bool,
    tx: oneshot::Sender<BucketGuard>,
}

impl GlobalGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a global block is in effect
    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }

    /// Number of requests parked behind the block
    pub fn parked(&self) -> usize {
        self.state.lock().ready_queue.len()
    }

    /// Route a waiter to its bucket, or park it if blocked.
    ///
    /// Unauthenticated requests are never subject to the global limit.
    pub fn submit(
        &self,
        bucket: &Arc<SequentialBucket>,
        requires_auth: bool,
        priority: bool,
        tx: oneshot::Sender<BucketGuard>,
    ) {
        {
            let mut state = self.state.lock();
            if state.blocked && requires_auth {
                let parked = Parked {
                    bucket: Arc::clone(bucket),
                    priority,
                    tx,
                };
                if priority {
                    state.ready_queue.push_front(parked);
                } else {
                    state.ready_queue.push_back(parked);
                }
                return;
            }
        }
        bucket.enqueue(tx, priority);
    }

    /// Block authenticated traffic for `ms` milliseconds (at least 1).
    ///
    /// A block already in effect is extended if the new one ends later.
    pub fn block_for(self: &Arc<Self>, ms: i64) {
        let ms = ms.max(1);
        let until = now_millis() + ms;

        let spawn_timer = {
            let mut state = self.state.lock();
            state.until = state.until.max(until);
            let was_blocked = state.blocked;
            state.blocked = true;
            !was_blocked
        };

        tracing::warn!(retry_after_ms = ms, "Global rate limit hit, blocking requests");

        if spawn_timer {
            let gate = Arc::clone(self);
            tokio::spawn(async move {
                let mut wait = ms;
                loop {
                    tokio::time::sleep(Duration::from_millis(wait.unsigned_abs())).await;
                    if let Some(parked) = gate.take_expired(now_millis()) {
                        Self::flush(parked);
                        break;
                    }
                    wait = (gate.state.lock().until - now_millis()).max(1);
                }
            });
        }
    }

    /// Lift the block and hand parked requests to their buckets in order
    pub fn unblock(&self) {
        let parked: Vec<Parked> = {
            let mut state = self.state.lock();
            state.blocked = false;
            state.ready_queue.drain(..).collect()
        };
        Self::flush(parked);
    }

    /// Lift the block only if it has run out by `now`; checked and released
    /// under one lock
    fn take_expired(&self, now: i64) -> Option<Vec<Parked>> {
        let mut state = self.state.lock();
        if state.until > now {
            return None;
        }
        state.blocked = false;
        Some(state.ready_queue.drain(..).collect())
    }

    fn flush(parked: Vec<Parked>) {
        if !parked.is_empty() {
            tracing::debug!(count = parked.len(), "Global block lifted, flushing parked requests");
        }

        for Parked {
            bucket,
            priority,
            tx,
        } in parked
        {
            bucket.enqueue(tx, priority);
        }
    }
}
