//! Shared clock model
//!
//! One [`LatencyRef`] exists per handler. It tracks a rolling average of
//! round-trip latency and of the offset between the server's `Date` header
//! and the local clock; buckets subtract the latency from server-declared
//! reset times before sleeping.

use std::collections::VecDeque;

/// Number of samples in each rolling window
const WINDOW: usize = 10;
/// Minimum spacing between clock offset samples
const OFFSET_CHECK_INTERVAL_MS: i64 = 5_000;
/// `Date` has second precision; assume the midpoint
const DATE_HEADER_SLACK_MS: i64 = 500;

/// Outcome of feeding one `Date` header into the clock model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockCheck {
    /// Sampled too recently, nothing recorded
    Skipped,
    /// Offset recorded and within threshold
    Recorded,
    /// Both the averaged offset and this sample exceed the threshold
    Drift { offset_ms: i64, sample_ms: i64 },
}

/// Rolling latency and clock offset averages
#[derive(Debug, Clone)]
pub struct LatencyRef {
    latency: i64,
    raw: VecDeque<i64>,
    time_offset: i64,
    time_offsets: VecDeque<i64>,
    last_time_offset_check: i64,
}

impl LatencyRef {
    /// Create a clock model seeded with `offset_ms` as the assumed latency
    pub fn new(offset_ms: i64) -> Self {
        Self {
            latency: offset_ms,
            raw: std::iter::repeat(offset_ms).take(WINDOW).collect(),
            time_offset: 0,
            time_offsets: std::iter::repeat(0).take(WINDOW).collect(),
            last_time_offset_check: 0,
        }
    }

    /// Averaged round-trip latency in milliseconds
    #[inline]
    pub fn latency(&self) -> i64 {
        self.latency
    }

    /// Averaged server-minus-local clock offset in milliseconds
    #[inline]
    pub fn time_offset(&self) -> i64 {
        self.time_offset
    }

    /// Record one round-trip latency sample
    pub fn record_latency(&mut self, sample_ms: i64) {
        self.latency = roll(&mut self.raw, self.latency, sample_ms);
    }

    /// Record the server `Date` header observed at local time `now_ms`.
    ///
    /// Samples are taken at most once every 5 seconds. Drift is reported
    /// only when the running average and the fresh sample both exceed
    /// `threshold_ms` after latency compensation.
    pub fn observe_server_date(
        &mut self,
        server_date_ms: i64,
        now_ms: i64,
        threshold_ms: i64,
    ) -> ClockCheck {
        if now_ms - self.last_time_offset_check < OFFSET_CHECK_INTERVAL_MS {
            return ClockCheck::Skipped;
        }
        self.last_time_offset_check = now_ms;

        let sample = server_date_ms + DATE_HEADER_SLACK_MS - now_ms;
        let drifted = self.time_offset - self.latency >= threshold_ms
            && sample - self.latency >= threshold_ms;
        let offset_before = self.time_offset;

        self.time_offset = roll(&mut self.time_offsets, self.time_offset, sample);

        if drifted {
            ClockCheck::Drift {
                offset_ms: offset_before,
                sample_ms: sample,
            }
        } else {
            ClockCheck::Recorded
        }
    }
}

impl Default for LatencyRef {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Replace the oldest sample and adjust the running average
fn roll(window: &mut VecDeque<i64>, average: i64, sample: i64) -> i64 {
    let oldest = window.pop_front().unwrap_or(0);
    window.push_back(sample);
    average - oldest.div_euclid(WINDOW as i64) + sample.div_euclid(WINDOW as i64)
}
