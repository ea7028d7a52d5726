//! Rate-limit response headers

use reqwest::header::{HeaderMap, DATE, RETRY_AFTER};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const X_RATELIMIT_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const X_RATELIMIT_GLOBAL: &str = "x-ratelimit-global";
pub const X_RATELIMIT_SCOPE: &str = "x-ratelimit-scope";

/// Rate-limit information carried by one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `x-ratelimit-limit`
    pub limit: Option<u32>,
    /// `x-ratelimit-remaining`; present but unparsable reads as 0
    pub remaining: Option<i64>,
    /// `x-ratelimit-reset-after`, else `retry-after`, in milliseconds
    pub reset_after_ms: Option<i64>,
    /// `x-ratelimit-reset` as Unix milliseconds
    pub reset_at_ms: Option<i64>,
    pub global: bool,
    /// `user`, `global` or `shared`
    pub scope: Option<String>,
    /// Server `Date` as Unix milliseconds
    pub server_date_ms: Option<i64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        };

        let reset_after_ms = text(X_RATELIMIT_RESET_AFTER)
            .or_else(|| text(RETRY_AFTER.as_str()))
            .and_then(seconds_to_ms);

        Self {
            limit: text(X_RATELIMIT_LIMIT).and_then(|v| v.parse().ok()),
            remaining: text(X_RATELIMIT_REMAINING).map(|v| v.parse().unwrap_or(0)),
            reset_after_ms,
            reset_at_ms: text(X_RATELIMIT_RESET).and_then(seconds_to_ms),
            global: headers.contains_key(X_RATELIMIT_GLOBAL),
            scope: text(X_RATELIMIT_SCOPE).map(str::to_string),
            server_date_ms: text(DATE.as_str()).and_then(|v| {
                chrono::DateTime::parse_from_rfc2822(v)
                    .ok()
                    .map(|date| date.timestamp_millis())
            }),
        }
    }

    /// Whether the limit is shared across clients
    pub fn is_shared(&self) -> bool {
        self.scope.as_deref() == Some("shared")
    }
}

/// Fractional seconds to whole milliseconds
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn seconds_to_ms(value: &str) -> Option<i64> {
    let seconds: f64 = value.parse().ok()?;
    seconds
        .is_finite()
        .then(|| (seconds * 1000.0).round() as i64)
}
