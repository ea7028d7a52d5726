//! Per-route sequential bucket
//!
//! Requests sharing a route key pass through one [`SequentialBucket`] at a
//! time. A waiter receives a [`BucketGuard`]; the next waiter is not admitted
//! until that guard is dropped, so rate-limit headers from one response are
//! always applied before the next request on the route starts.

use crate::latency::LatencyRef;
use crate::now_millis;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Quota assumed for a route until the server reports one
const DEFAULT_LIMIT: u32 = 1;

/// FIFO queue plus token accounting for one route key
#[derive(Debug)]
pub struct SequentialBucket {
    route: String,
    latency: Arc<Mutex<LatencyRef>>,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    limit: u32,
    remaining: i64,
    /// Absolute reset time (Unix ms); 0 means no window observed yet
    reset: i64,
    /// One waiter is admitted or a reset timer is pending
    processing: bool,
    queue: VecDeque<oneshot::Sender<BucketGuard>>,
}

/// Rate-limit state parsed from one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketUpdate {
    pub limit: Option<u32>,
    pub remaining: i64,
    pub reset: Option<i64>,
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub limit: u32,
    pub remaining: i64,
    pub reset: i64,
    pub queued: usize,
    pub processing: bool,
}

/// Admission to a bucket; dropping it lets the next waiter proceed.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the bucket"]
pub struct BucketGuard {
    bucket: Arc<SequentialBucket>,
    armed: bool,
}

impl BucketGuard {
    /// Route key of the bucket this guard holds
    pub fn route(&self) -> &str {
        &self.bucket.route
    }

    /// The bucket this guard holds
    pub fn bucket(&self) -> &Arc<SequentialBucket> {
        &self.bucket
    }
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        if self.armed {
            self.bucket.check(true);
        }
    }
}

impl SequentialBucket {
    /// Create an idle bucket with the default limit of 1
    pub fn new(route: impl Into<String>, latency: Arc<Mutex<LatencyRef>>) -> Arc<Self> {
        Arc::new(Self {
            route: route.into(),
            latency,
            state: Mutex::new(BucketState {
                limit: DEFAULT_LIMIT,
                remaining: i64::from(DEFAULT_LIMIT),
                reset: 0,
                processing: false,
                queue: VecDeque::new(),
            }),
        })
    }

    /// Route key this bucket governs
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Wait for admission.
    ///
    /// Returns `None` only if the bucket stopped driving its queue, which
    /// happens when the runtime shuts down underneath a pending timer.
    pub async fn acquire(self: &Arc<Self>, priority: bool) -> Option<BucketGuard> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(tx, priority);
        rx.await.ok()
    }

    /// Queue a waiter; the guard is sent on `tx` once it is admitted.
    ///
    /// Priority waiters go to the front of the queue.
    pub fn enqueue(self: &Arc<Self>, tx: oneshot::Sender<BucketGuard>, priority: bool) {
        {
            let mut state = self.state.lock();
            if priority {
                state.queue.push_front(tx);
            } else {
                state.queue.push_back(tx);
            }
        }
        self.check(false);
    }

    /// Apply rate-limit headers from a response
    pub fn apply(&self, update: BucketUpdate) {
        let mut state = self.state.lock();
        if let Some(limit) = update.limit {
            state.limit = limit;
        }
        state.remaining = update.remaining;
        if let Some(reset) = update.reset {
            state.reset = reset;
        }
    }

    /// Current limit
    pub fn limit(&self) -> u32 {
        self.state.lock().limit
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset: state.reset,
            queued: state.queue.len(),
            processing: state.processing,
        }
    }

    /// Admit the head of the queue if possible.
    ///
    /// `resumed` is set when the caller is the holder of the processing slot
    /// (a released guard or a fired reset timer) rather than a new arrival.
    fn check(self: &Arc<Self>, resumed: bool) {
        let latency = self.latency.lock().latency();
        let mut state = self.state.lock();

        if state.processing && !resumed {
            return;
        }

        loop {
            let Some(tx) = state.queue.pop_front() else {
                state.processing = false;
                return;
            };

            let now = now_millis();
            if state.reset == 0 || state.reset <= now + latency {
                state.reset = now;
                state.remaining = i64::from(state.limit);
            }

            if state.remaining <= 0 {
                let wait = (state.reset - now - latency).max(0);
                state.queue.push_front(tx);
                state.processing = true;

                tracing::debug!(
                    route = %self.route,
                    reset_in_ms = wait,
                    queued = state.queue.len(),
                    "Bucket exhausted, waiting for reset"
                );

                let bucket = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(wait.unsigned_abs() + 1)).await;
                    bucket.check(true);
                });
                return;
            }

            state.remaining -= 1;
            state.processing = true;

            let guard = BucketGuard {
                bucket: Arc::clone(self),
                armed: true,
            };
            match tx.send(guard) {
                Ok(()) => return,
                Err(mut guard) => {
                    // Waiter gave up; hand its token back and try the next one
                    guard.armed = false;
                    state.remaining += 1;
                }
            }
        }
    }
}
