//! Broadcast fan-out for client events.
//!
//! Every event is mirrored into `tracing` before it is broadcast, so the
//! core stays observable even when nobody subscribes.

use chat_core::ClientEvent;
use tokio::sync::broadcast;

/// Default broadcast buffer size
const DEFAULT_BUFFER: usize = 1024;

/// Cloneable handle that publishes [`ClientEvent`]s to subscribers
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventEmitter {
    /// Create an emitter with the given broadcast buffer
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Subscribe to all events raised after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event
    pub fn emit(&self, event: ClientEvent) {
        match &event {
            ClientEvent::Request(req) => tracing::trace!(
                method = %req.method,
                path = %req.path,
                route = %req.route,
                status = req.status,
                latency_ms = req.latency_ms,
                "REST request completed"
            ),
            ClientEvent::Debug { message, shard_id } => {
                tracing::debug!(shard_id = ?shard_id, "{message}");
            }
            ClientEvent::Warn { message } => tracing::warn!("{message}"),
            ClientEvent::Error { message } => tracing::error!("{message}"),
            ClientEvent::ShardDisconnect { shard_id, error } => {
                tracing::info!(shard_id = shard_id, error = ?error, "Shard disconnected");
            }
            other => tracing::info!(event = other.event_type(), shard_id = ?other.shard_id(), "Lifecycle event"),
        }

        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(ClientEvent::debug(message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(ClientEvent::warn(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ClientEvent::error(message));
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
