//! Gateway bootstrap metadata
//!
//! `GET /gateway/bot` tells a client where to connect, how many shards the
//! server recommends and how many identifies it may still start today.

use crate::error::{GatewayError, GatewayResult};
use chat_common::{GatewayConfig, ShardCount};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget for the current day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets to `total`
    pub reset_after: u64,
    /// Identify buckets that may run in parallel
    pub max_concurrency: u32,
}

/// Resolved sharding for this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    pub gateway_url: String,
    pub shard_count: u32,
    pub first_shard_id: u32,
    pub last_shard_id: u32,
    pub concurrency: u32,
}

impl ShardPlan {
    /// Combine local configuration with the server's recommendations.
    ///
    /// Fails when the range is empty or out of bounds, or when the day's
    /// identify budget cannot cover every shard in the range.
    pub fn resolve(config: &GatewayConfig, bot: &GatewayBot) -> GatewayResult<Self> {
        let shard_count = match config.shard_count {
            ShardCount::Auto => bot.shards,
            ShardCount::Fixed(count) => count,
        };
        let first = config.first_shard_id;
        let last = config
            .last_shard_id
            .unwrap_or_else(|| shard_count.saturating_sub(1));

        if shard_count == 0 || first > last || last >= shard_count {
            return Err(GatewayError::InvalidShardRange {
                first,
                last,
                count: shard_count,
            });
        }

        let required = last - first + 1;
        let limit = &bot.session_start_limit;
        if limit.remaining < required {
            return Err(GatewayError::SessionLimitExhausted {
                remaining: limit.remaining,
                required,
                reset_after_ms: limit.reset_after,
            });
        }

        let concurrency = config
            .concurrency
            .unwrap_or(limit.max_concurrency)
            .max(1);

        tracing::debug!(
            shard_count,
            first,
            last,
            concurrency,
            remaining = limit.remaining,
            "Resolved shard plan"
        );

        Ok(Self {
            gateway_url: bot.url.clone(),
            shard_count,
            first_shard_id: first,
            last_shard_id: last,
            concurrency,
        })
    }

    /// Shard IDs owned by this process
    pub fn shard_ids(&self) -> RangeInclusive<u32> {
        self.first_shard_id..=self.last_shard_id
    }
}
