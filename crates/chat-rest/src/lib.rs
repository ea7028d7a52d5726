//! # chat-rest
//!
//! REST request dispatcher for the chat platform API.
//!
//! Every request is assigned a route key; requests sharing a key run one at a
//! time through a [`SequentialBucket`] that honours the quota the server
//! reports in its rate-limit headers. 429 and 502 responses are retried
//! internally, and a server-declared global limit parks all authenticated
//! traffic until it expires.

pub mod bucket;
pub mod error;
pub mod global;
pub mod handler;
pub mod headers;
pub mod image;
pub mod latency;
pub mod request;
pub mod response;
pub mod route;

// Re-export commonly used types at crate root
pub use bucket::{BucketGuard, BucketSnapshot, BucketUpdate, SequentialBucket};
pub use error::{ApiError, HttpError, RestError, RestResult};
pub use global::GlobalGate;
pub use handler::{RequestHandler, RequestHandlerOptions};
pub use headers::RateLimitHeaders;
pub use image::{detect_mime, to_data_url, validate_data_url};
pub use latency::LatencyRef;
pub use request::{Auth, FileAttachment, Method, RestRequest};
pub use response::ResponseBody;
pub use route::{route_key, route_key_at};

/// Current Unix time in milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
