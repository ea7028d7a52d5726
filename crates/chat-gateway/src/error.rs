//! Gateway error types

use thiserror::Error;

/// Result alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(
        "session start limit exhausted: {remaining} identifies left but {required} shards to start \
         (resets in {reset_after_ms}ms)"
    )]
    SessionLimitExhausted {
        remaining: u32,
        required: u32,
        reset_after_ms: u64,
    },

    #[error("invalid shard range {first}..={last} for {count} shards")]
    InvalidShardRange { first: u32, last: u32, count: u32 },

    #[error("shard {0} is not managed by this client")]
    UnknownShard(u32),
}
