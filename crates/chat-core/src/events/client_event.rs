//! Events raised by the client core
//!
//! These events are used for:
//! - Request/response auditing by an external logging layer
//! - Rate-limit diagnostics (`Debug`)
//! - Clock drift and configuration warnings (`Warn`)
//! - Shard and client lifecycle transitions

use serde::Serialize;

/// All events the client can raise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    // =========================================================================
    // REST Events
    // =========================================================================
    /// A REST call completed and its body was parsed
    Request(RequestEvent),

    // =========================================================================
    // Diagnostics
    // =========================================================================
    Debug {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shard_id: Option<u32>,
    },
    Warn {
        message: String,
    },
    Error {
        message: String,
    },

    // =========================================================================
    // Shard Lifecycle
    // =========================================================================
    ShardReady {
        shard_id: u32,
    },
    ShardResume {
        shard_id: u32,
    },
    ShardDisconnect {
        shard_id: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // =========================================================================
    // Client Lifecycle
    // =========================================================================
    /// Every known shard is ready
    Ready,
    /// A shard dropped while the client was ready
    Disconnect,
}

/// Details of one completed REST call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEvent {
    pub method: String,
    pub path: String,
    pub route: String,
    pub with_auth: bool,
    pub status: u16,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
}

impl ClientEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Request(_) => "REQUEST",
            Self::Debug { .. } => "DEBUG",
            Self::Warn { .. } => "WARN",
            Self::Error { .. } => "ERROR",
            Self::ShardReady { .. } => "SHARD_READY",
            Self::ShardResume { .. } => "SHARD_RESUME",
            Self::ShardDisconnect { .. } => "SHARD_DISCONNECT",
            Self::Ready => "READY",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// Create a debug event not tied to a shard
    pub fn debug(message: impl Into<String>) -> Self {
        Self::Debug {
            message: message.into(),
            shard_id: None,
        }
    }

    /// Create a warning event
    pub fn warn(message: impl Into<String>) -> Self {
        Self::Warn {
            message: message.into(),
        }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Shard the event concerns, if any
    pub fn shard_id(&self) -> Option<u32> {
        match self {
            Self::Debug { shard_id, .. } => *shard_id,
            Self::ShardReady { shard_id }
            | Self::ShardResume { shard_id }
            | Self::ShardDisconnect { shard_id, .. } => Some(*shard_id),
            _ => None,
        }
    }
}
