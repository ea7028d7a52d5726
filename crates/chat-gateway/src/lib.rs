//! # chat-gateway
//!
//! Shard connection scheduling for the real-time gateway.
//!
//! The socket protocol itself lives behind the [`Shard`] trait. This crate
//! decides *when* each shard may open its connection: shards sharing an
//! identify bucket (`id % concurrency`) are spaced at least five seconds
//! apart, and client-level readiness is derived from every shard's state.

pub mod error;
pub mod session;
pub mod shard;

// Re-export commonly used types at crate root
pub use error::GatewayError;
pub use session::{GatewayBot, SessionStartLimit, ShardPlan};
pub use shard::{
    Shard, ShardEvent, ShardEventSender, ShardFactory, ShardManager, ShardSpec, ShardStatus,
};

/// Current Unix time in milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
