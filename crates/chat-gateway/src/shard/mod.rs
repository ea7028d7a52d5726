//! Shard seam
//!
//! A [`Shard`] owns one gateway socket. The [`ShardManager`] only asks it to
//! connect and reads its status; the shard reports lifecycle transitions
//! back through the [`ShardEventSender`] it was created with.

mod manager;

pub use manager::ShardManager;

use chat_core::Intents;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shard connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    #[default]
    Disconnected,
    /// Socket opening
    Connecting,
    /// Waiting for Hello
    Handshaking,
    /// Identify sent, waiting for Ready
    Identifying,
    /// Resume sent, waiting for Resumed
    Resuming,
    Ready,
}

impl ShardStatus {
    /// Whether a handshake is in progress
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Identifying | Self::Resuming
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Lifecycle transition reported by a shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEvent {
    /// Identify succeeded
    Ready,
    /// Resume succeeded
    Resumed,
    /// Socket closed, with the reason if it was an error
    Disconnect(Option<String>),
}

/// Channel a shard uses to report to its manager
#[derive(Debug, Clone)]
pub struct ShardEventSender {
    id: u32,
    tx: mpsc::UnboundedSender<(u32, ShardEvent)>,
}

impl ShardEventSender {
    pub(crate) fn new(id: u32, tx: mpsc::UnboundedSender<(u32, ShardEvent)>) -> Self {
        Self { id, tx }
    }

    pub fn shard_id(&self) -> u32 {
        self.id
    }

    /// Report an event; silently dropped once the manager is gone
    pub fn send(&self, event: ShardEvent) {
        let _ = self.tx.send((self.id, event));
    }

    pub fn ready(&self) {
        self.send(ShardEvent::Ready);
    }

    pub fn resumed(&self) {
        self.send(ShardEvent::Resumed);
    }

    pub fn disconnected(&self, error: Option<String>) {
        self.send(ShardEvent::Disconnect(error));
    }
}

/// What a shard needs to identify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    pub id: u32,
    pub shard_count: u32,
    pub gateway_url: String,
    pub intents: Intents,
}

/// One gateway connection
pub trait Shard: Send + Sync {
    fn id(&self) -> u32;

    fn status(&self) -> ShardStatus;

    /// Whether a previous session can be resumed; resuming does not consume
    /// an identify slot
    fn has_session(&self) -> bool;

    /// Start the handshake. Called only when the manager grants a slot and
    /// must not block; the shard reports the outcome through its sender.
    fn connect(&self);
}

/// Builds shards for a manager
pub trait ShardFactory: Send + Sync {
    fn create(&self, spec: ShardSpec, events: ShardEventSender) -> Arc<dyn Shard>;
}
