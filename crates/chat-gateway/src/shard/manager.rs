//! Shard manager
//!
//! Queues shards for connection and admits them under the identify rate
//! limit: shards in the same bucket (`id % concurrency`) start at least
//! `identify_interval` apart, and never while a bucket-mate is mid-handshake.

use super::{Shard, ShardEvent, ShardEventSender, ShardFactory, ShardSpec};
use crate::error::GatewayError;
use crate::now_millis;
use chat_common::EventEmitter;
use chat_core::ClientEvent;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// Minimum spacing between identifies in one bucket
const IDENTIFY_INTERVAL: Duration = Duration::from_millis(5_000);
/// Queue re-check interval while shards are waiting
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Connect queue and identify bucket bookkeeping
#[derive(Default)]
struct ConnectState {
    queue: VecDeque<Arc<dyn Shard>>,
    /// Bucket key -> Unix ms of the last connect or ready
    buckets: HashMap<u32, i64>,
    retry_pending: bool,
}

/// Admission scheduler for a pool of shards
pub struct ShardManager {
    me: Weak<ShardManager>,
    factory: Arc<dyn ShardFactory>,
    events: EventEmitter,
    shards: DashMap<u32, Arc<dyn Shard>>,
    state: Mutex<ConnectState>,
    concurrency: AtomicU32,
    identify_interval_ms: i64,
    ready: AtomicBool,
    shard_tx: mpsc::UnboundedSender<(u32, ShardEvent)>,
}

impl ShardManager {
    /// Create a manager and start its shard event loop.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(factory: Arc<dyn ShardFactory>, concurrency: u32, events: EventEmitter) -> Arc<Self> {
        Self::with_identify_interval(factory, concurrency, events, IDENTIFY_INTERVAL)
    }

    /// Create a manager with a non-default identify spacing
    pub fn with_identify_interval(
        factory: Arc<dyn ShardFactory>,
        concurrency: u32,
        events: EventEmitter,
        identify_interval: Duration,
    ) -> Arc<Self> {
        let (shard_tx, shard_rx) = mpsc::unbounded_channel();
        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            factory,
            events,
            shards: DashMap::new(),
            state: Mutex::new(ConnectState::default()),
            concurrency: AtomicU32::new(concurrency.max(1)),
            identify_interval_ms: i64::try_from(identify_interval.as_millis()).unwrap_or(i64::MAX),
            ready: AtomicBool::new(false),
            shard_tx,
        });

        tokio::spawn(Self::run_events(Arc::downgrade(&manager), shard_rx));
        manager
    }

    async fn run_events(
        manager: Weak<Self>,
        mut rx: mpsc::UnboundedReceiver<(u32, ShardEvent)>,
    ) {
        while let Some((id, event)) = rx.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            manager.handle_event(id, event);
        }
        tracing::debug!("Shard event loop stopped");
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency.load(Ordering::Acquire)
    }

    /// Change the identify concurrency; values below 1 are treated as 1
    pub fn set_concurrency(&self, concurrency: u32) {
        self.concurrency.store(concurrency.max(1), Ordering::Release);
    }

    /// Whether every shard is ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn shard(&self, id: u32) -> Option<Arc<dyn Shard>> {
        self.shards.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Sorted IDs of managed shards
    pub fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shards.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Shards waiting for a connect slot
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Unix ms of the last connect or ready in `bucket`
    pub fn bucket_last_connect(&self, bucket: u32) -> Option<i64> {
        self.state.lock().buckets.get(&bucket).copied()
    }

    /// Create a shard and register it, replacing any shard with the same ID
    pub fn spawn(&self, spec: ShardSpec) -> Arc<dyn Shard> {
        let id = spec.id;
        let sender = ShardEventSender::new(id, self.shard_tx.clone());
        let shard = self.factory.create(spec, sender);
        self.shards.insert(id, Arc::clone(&shard));

        tracing::debug!(shard_id = id, "Shard spawned");
        shard
    }

    /// Queue a managed shard for connection
    pub fn connect_shard(&self, id: u32) -> Result<(), GatewayError> {
        let shard = self.shard(id).ok_or(GatewayError::UnknownShard(id))?;
        self.connect(shard);
        Ok(())
    }

    /// Queue a shard for connection and drain the queue
    pub fn connect(&self, shard: Arc<dyn Shard>) {
        {
            let mut state = self.state.lock();
            let id = shard.id();
            if state.queue.iter().any(|queued| queued.id() == id) {
                return;
            }
            state.queue.push_back(shard);
        }
        self.try_connect();
    }

    /// Admit every queued shard whose bucket is free.
    ///
    /// A shard is held back if it must identify and its bucket was used
    /// within the identify interval, or if another shard in its bucket is
    /// mid-handshake. Held-back shards are re-checked on a timer.
    pub fn try_connect(&self) {
        let concurrency = self.concurrency();
        let now = now_millis();

        let (granted, schedule_retry) = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                return;
            }

            let mut granted = Vec::new();
            let mut claimed = HashSet::new();
            let mut index = 0;
            while index < state.queue.len() {
                let shard = &state.queue[index];
                let id = shard.id();
                let bucket = id % concurrency;

                let last = state.buckets.get(&bucket).copied().unwrap_or(0);
                let cooling = !shard.has_session() && now - last < self.identify_interval_ms;
                let busy = claimed.contains(&bucket) || self.bucket_busy(bucket, id, concurrency);
                if cooling || busy {
                    index += 1;
                    continue;
                }

                if let Some(shard) = state.queue.remove(index) {
                    state.buckets.insert(bucket, now);
                    claimed.insert(bucket);
                    granted.push(shard);
                }
            }

            let schedule_retry = !state.queue.is_empty() && !state.retry_pending;
            if schedule_retry {
                state.retry_pending = true;
            }
            (granted, schedule_retry)
        };

        for shard in granted {
            self.events.emit(ClientEvent::Debug {
                message: format!("Connecting shard {}", shard.id()),
                shard_id: Some(shard.id()),
            });
            shard.connect();
        }

        if schedule_retry {
            let me = self.me.clone();
            tokio::spawn(async move {
                tokio::time::sleep(RETRY_INTERVAL).await;
                if let Some(manager) = me.upgrade() {
                    manager.state.lock().retry_pending = false;
                    manager.try_connect();
                }
            });
        }
    }

    /// Record a successful identify or resume.
    ///
    /// Stamps the shard's bucket as used and lets the queue advance.
    pub fn identified(&self, id: u32) {
        let bucket = id % self.concurrency();
        self.state.lock().buckets.insert(bucket, now_millis());
        self.try_connect();
    }

    /// Apply a lifecycle event reported by a shard
    pub fn handle_event(&self, id: u32, event: ShardEvent) {
        match event {
            ShardEvent::Ready => {
                self.identified(id);
                self.events.emit(ClientEvent::ShardReady { shard_id: id });
                self.update_readiness();
            }
            ShardEvent::Resumed => {
                self.identified(id);
                self.events.emit(ClientEvent::ShardResume { shard_id: id });
                self.update_readiness();
            }
            ShardEvent::Disconnect(error) => {
                self.events.emit(ClientEvent::ShardDisconnect {
                    shard_id: id,
                    error,
                });
                if self.ready.swap(false, Ordering::AcqRel) {
                    self.events.emit(ClientEvent::Disconnect);
                }
            }
        }
    }

    /// Another shard in `bucket` is mid-handshake
    fn bucket_busy(&self, bucket: u32, id: u32, concurrency: u32) -> bool {
        self.shards.iter().any(|entry| {
            let other = entry.value();
            other.id() != id && other.id() % concurrency == bucket && other.status().is_connecting()
        })
    }

    fn update_readiness(&self) {
        if self.ready.load(Ordering::Acquire) || self.shards.is_empty() {
            return;
        }
        let all_ready = self.shards.iter().all(|entry| entry.value().status().is_ready());
        if all_ready && !self.ready.swap(true, Ordering::AcqRel) {
            self.events.emit(ClientEvent::Ready);
        }
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("concurrency", &self.concurrency())
            .field("shards", &self.shards.len())
            .field("queued", &self.queued())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
