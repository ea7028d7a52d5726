//! Client facade

use crate::error::{ClientError, ClientResult};
use chat_common::{ClientConfig, EventEmitter};
use chat_core::{ClientEvent, Intents};
use chat_gateway::{GatewayBot, ShardFactory, ShardManager, ShardPlan, ShardSpec};
use chat_rest::{RequestHandler, ResponseBody, RestRequest, RestResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Entry point for REST calls and gateway sharding
pub struct Client {
    config: ClientConfig,
    intents: Intents,
    events: EventEmitter,
    rest: Arc<RequestHandler>,
    shards: Mutex<Option<Arc<ShardManager>>>,
}

impl Client {
    /// Create a client with its own event bus
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Self::with_events(config, EventEmitter::default())
    }

    /// Create a client that reports to an existing event bus.
    ///
    /// Unknown intent names are reported as warnings and otherwise ignored.
    pub fn with_events(config: ClientConfig, events: EventEmitter) -> ClientResult<Self> {
        let parsed = Intents::from_names(&config.gateway.intent_names);
        for name in &parsed.unknown {
            events.warn(format!("Unknown intent: {name}"));
        }
        if parsed.intents.is_privileged() {
            tracing::debug!(intents = %parsed.intents, "Privileged intents requested");
        }

        let rest = Arc::new(RequestHandler::from_config(&config, events.clone())?);

        tracing::info!(
            app = %config.app.name,
            base_url = %rest.options().base_url,
            authenticated = rest.has_token(),
            "Client created"
        );

        Ok(Self {
            config,
            intents: parsed.intents,
            events,
            rest,
            shards: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolved gateway intents
    pub fn intents(&self) -> Intents {
        self.intents
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// The underlying REST dispatcher
    pub fn rest(&self) -> &Arc<RequestHandler> {
        &self.rest
    }

    pub async fn request(&self, request: RestRequest) -> RestResult<ResponseBody> {
        self.rest.request(request).await
    }

    pub async fn auth_request(&self, request: RestRequest) -> RestResult<ResponseBody> {
        self.rest.auth_request(request).await
    }

    /// Fetch gateway URL, recommended shard count and session start limits
    pub async fn gateway_bot(&self) -> ClientResult<GatewayBot> {
        let bot = self
            .rest
            .request_json(RestRequest::get("/gateway/bot").authenticated())
            .await?;
        Ok(bot)
    }

    /// Spawn this process's shards and queue them for connection.
    ///
    /// Shards are built by `factory`; the manager admits them under the
    /// identify rate limit and the call returns once they are queued.
    pub async fn connect(&self, factory: Arc<dyn ShardFactory>) -> ClientResult<Arc<ShardManager>> {
        self.config.require_token()?;
        if self.shards.lock().is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let bot = self.gateway_bot().await?;
        let plan = ShardPlan::resolve(&self.config.gateway, &bot)?;

        let manager = {
            let mut slot = self.shards.lock();
            if slot.is_some() {
                return Err(ClientError::AlreadyConnected);
            }
            let manager = ShardManager::new(factory, plan.concurrency, self.events.clone());
            *slot = Some(Arc::clone(&manager));
            manager
        };

        self.events.debug(format!(
            "Starting shards {}-{} of {} with concurrency {}",
            plan.first_shard_id, plan.last_shard_id, plan.shard_count, plan.concurrency
        ));

        for id in plan.shard_ids() {
            manager.spawn(ShardSpec {
                id,
                shard_count: plan.shard_count,
                gateway_url: plan.gateway_url.clone(),
                intents: self.intents,
            });
        }
        for id in plan.shard_ids() {
            manager.connect_shard(id)?;
        }

        Ok(manager)
    }

    /// The shard manager, once [`connect`](Self::connect) has run
    pub fn shards(&self) -> Option<Arc<ShardManager>> {
        self.shards.lock().clone()
    }

    /// Whether every shard is ready
    pub fn is_ready(&self) -> bool {
        self.shards
            .lock()
            .as_ref()
            .is_some_and(|manager| manager.is_ready())
    }
}
