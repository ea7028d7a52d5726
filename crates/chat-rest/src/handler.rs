//! Request handler
//!
//! Owns the route-key to bucket map, the shared clock model and the global
//! gate for one client. Each call to [`RequestHandler::request`] waits for
//! its bucket, issues the HTTP call, feeds the rate-limit headers back into
//! the bucket and then either returns, retries or fails.

use crate::bucket::{BucketGuard, BucketSnapshot, BucketUpdate, SequentialBucket};
use crate::error::{ApiError, HttpError, RestError, RestResult};
use crate::global::GlobalGate;
use crate::headers::RateLimitHeaders;
use crate::latency::{ClockCheck, LatencyRef};
use crate::now_millis;
use crate::request::{Auth, Method, RestRequest};
use crate::response::ResponseBody;
use crate::route::route_key_at;
use chat_common::{ClientConfig, EventEmitter, RestConfig};
use chat_core::{ClientEvent, RequestEvent};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Total attempts for a request answered with 502
const MAX_BAD_GATEWAY_ATTEMPTS: u32 = 4;
/// Backoff range between 502 retries
const BAD_GATEWAY_BACKOFF_MS: std::ops::Range<u64> = 100..2000;

/// Handler settings
#[derive(Debug, Clone)]
pub struct RequestHandlerOptions {
    pub base_url: String,
    pub user_agent: String,
    /// `None` disables the per-call timeout
    pub request_timeout: Option<Duration>,
    pub latency_threshold_ms: i64,
    pub ratelimiter_offset_ms: i64,
    pub super_properties: Option<String>,
}

impl Default for RequestHandlerOptions {
    fn default() -> Self {
        Self::from(&RestConfig::default())
    }
}

impl From<&RestConfig> for RequestHandlerOptions {
    fn from(config: &RestConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
            latency_threshold_ms: config.latency_threshold_ms,
            ratelimiter_offset_ms: config.ratelimiter_offset_ms,
            super_properties: config.super_properties.clone(),
        }
    }
}

/// Rate-limited REST dispatcher
#[derive(Debug)]
pub struct RequestHandler {
    http: reqwest::Client,
    options: RequestHandlerOptions,
    token: Option<String>,
    events: EventEmitter,
    latency: Arc<Mutex<LatencyRef>>,
    buckets: DashMap<String, Arc<SequentialBucket>>,
    global: Arc<GlobalGate>,
}

/// Raw result of one HTTP exchange
struct Exchange {
    status: reqwest::StatusCode,
    headers: RateLimitHeaders,
    body: ResponseBody,
}

/// Bucket changes derived from one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimitOutcome {
    update: BucketUpdate,
    /// Server declared a global limit lasting this long
    global_block_ms: Option<i64>,
    missing_limit: bool,
}

impl RequestHandler {
    /// Create a handler.
    ///
    /// `token` is the full `Authorization` value used for [`Auth::Default`].
    pub fn new(
        options: RequestHandlerOptions,
        token: Option<String>,
        events: EventEmitter,
    ) -> RestResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            latency: Arc::new(Mutex::new(LatencyRef::new(options.ratelimiter_offset_ms))),
            options,
            token,
            events,
            buckets: DashMap::new(),
            global: GlobalGate::new(),
        })
    }

    /// Create a handler from loaded client configuration
    pub fn from_config(config: &ClientConfig, events: EventEmitter) -> RestResult<Self> {
        Self::new(
            RequestHandlerOptions::from(&config.rest),
            config.token.clone(),
            events,
        )
    }

    pub fn options(&self) -> &RequestHandlerOptions {
        &self.options
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Copy of the shared clock model
    pub fn latency(&self) -> LatencyRef {
        self.latency.lock().clone()
    }

    pub fn is_globally_blocked(&self) -> bool {
        self.global.is_blocked()
    }

    /// State of the bucket for `route`, if one has been created
    pub fn bucket_snapshot(&self, route: &str) -> Option<BucketSnapshot> {
        self.buckets.get(route).map(|bucket| bucket.snapshot())
    }

    /// Number of distinct route buckets seen so far
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// [`request`](Self::request) authenticated with the default token
    /// unless the descriptor names its own.
    pub async fn auth_request(&self, request: RestRequest) -> RestResult<ResponseBody> {
        let request = match request.auth {
            Auth::None => request.auth(Auth::Default),
            _ => request,
        };
        self.request(request).await
    }

    /// [`request`](Self::request) and deserialize the JSON body
    pub async fn request_json<T: DeserializeOwned>(&self, request: RestRequest) -> RestResult<T> {
        Ok(self.request(request).await?.deserialize()?)
    }

    /// Execute one logical request.
    ///
    /// 429 responses and up to three 502 responses are retried internally;
    /// every other outcome is returned to the caller.
    pub async fn request(&self, request: RestRequest) -> RestResult<ResponseBody> {
        let method = Method::parse(&request.method)?;
        let path = if request.path.starts_with('/') {
            request.path.clone()
        } else {
            format!("/{}", request.path)
        };

        let authorization = match &request.auth {
            Auth::None => None,
            Auth::Default => Some(self.token.clone().ok_or(RestError::MissingToken)?),
            Auth::Token(token) => Some(token.clone()),
        };
        let with_auth = authorization.is_some();

        let route = match &request.route {
            Some(route) => route.clone(),
            None => {
                let latency = self.latency.lock().latency();
                route_key_at(&path, method.as_str(), now_millis() - latency)
            }
        };
        let bucket = self.bucket(&route);

        let mut attempts = 0;
        let mut priority = request.priority;
        let mut held: Option<BucketGuard> = None;

        loop {
            let (tx, rx) = oneshot::channel();
            self.global.submit(&bucket, with_auth, priority, tx);
            // A retry is queued ahead of others before the old slot is freed
            drop(held.take());
            let guard = rx.await.map_err(|_| RestError::Cancelled)?;

            let exchange = self
                .exchange(method, &path, &route, &request, authorization.as_deref())
                .await?;

            let outcome = rate_limit_outcome(
                &route,
                &exchange.headers,
                bucket.limit(),
                self.latency.lock().time_offset(),
                now_millis(),
            );
            if outcome.missing_limit {
                self.events.debug(format!(
                    "Missing rate-limit headers on {} {route}",
                    method.as_str()
                ));
            }
            if let Some(ms) = outcome.global_block_ms {
                self.events
                    .debug(format!("Global rate limit hit, blocking for {ms}ms"));
                self.global.block_for(ms);
            }
            bucket.apply(outcome.update);

            let status = exchange.status.as_u16();

            if status == 429 {
                let delay = retry_delay(&exchange.headers, &exchange.body);
                self.events.debug(format!(
                    "429: hit on route {route} (global: {}, scope: {}), retrying in {delay}ms",
                    exchange.headers.global,
                    exchange.headers.scope.as_deref().unwrap_or("user"),
                ));
                // Globally blocked retries are held by the gate instead
                if !(exchange.headers.global && with_auth) && delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay.unsigned_abs())).await;
                }
                held = Some(guard);
                priority = true;
                continue;
            }

            if status == 502 {
                attempts += 1;
                if attempts < MAX_BAD_GATEWAY_ATTEMPTS {
                    drop(guard);
                    let backoff = rand::thread_rng().gen_range(BAD_GATEWAY_BACKOFF_MS);
                    self.events.debug(format!(
                        "502 on {} {path} (attempt {attempts}), retrying in {backoff}ms",
                        method.as_str()
                    ));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    continue;
                }
            }

            drop(guard);

            if status > 300 {
                return Err(classify_failure(method, &path, exchange));
            }

            return Ok(exchange.body);
        }
    }

    fn bucket(&self, route: &str) -> Arc<SequentialBucket> {
        let entry = self
            .buckets
            .entry(route.to_string())
            .or_insert_with(|| SequentialBucket::new(route, Arc::clone(&self.latency)));
        Arc::clone(entry.value())
    }

    /// Issue one HTTP call and parse its response
    async fn exchange(
        &self,
        method: Method,
        path: &str,
        route: &str,
        request: &RestRequest,
        authorization: Option<&str>,
    ) -> RestResult<Exchange> {
        let builder = self.build(method, path, request, authorization)?;

        let started = now_millis();
        let call = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, bytes))
        };

        let result = match self.options.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                tracing::debug!(method = method.as_str(), path, "Request timed out");
                RestError::Timeout {
                    method: method.as_str().to_string(),
                    path: path.to_string(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
            None => call.await,
        };

        let (status, raw_headers, bytes) = result.map_err(|e| {
            self.events.error(format!(
                "Request {} {path} failed: {e}",
                method.as_str()
            ));
            RestError::Transport(e)
        })?;

        let now = now_millis();
        let latency_ms = now - started;
        self.latency.lock().record_latency(latency_ms);

        let content_type = raw_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let body = ResponseBody::parse(status.as_u16(), content_type, &bytes).map_err(|e| {
            self.events.error(format!(
                "Invalid JSON in response to {} {path}: {e}",
                method.as_str()
            ));
            RestError::Serialization(e)
        })?;

        self.events.emit(ClientEvent::Request(RequestEvent {
            method: method.as_str().to_string(),
            path: path.to_string(),
            route: route.to_string(),
            with_auth: authorization.is_some(),
            status: status.as_u16(),
            latency_ms,
            request_body: request.json.clone(),
            response_body: body.as_json().cloned(),
        }));

        let headers = RateLimitHeaders::from_headers(&raw_headers);

        if let Some(server_date) = headers.server_date_ms {
            let check = self.latency.lock().observe_server_date(
                server_date,
                now,
                self.options.latency_threshold_ms,
            );
            if let ClockCheck::Drift {
                offset_ms,
                sample_ms,
            } = check
            {
                self.events.warn(format!(
                    "Your clock is {offset_ms}ms behind the server (last sample {sample_ms}ms). \
                     Please check your connection and system time."
                ));
            }
        }

        Ok(Exchange {
            status,
            headers,
            body,
        })
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        request: &RestRequest,
        authorization: Option<&str>,
    ) -> RestResult<reqwest::RequestBuilder> {
        let url = format!("{}{path}", self.options.base_url);
        let mut builder = self.http.request(method.into(), url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        if let Some(reason) = &request.reason {
            builder = builder.header("X-Audit-Log-Reason", encode_reason(reason));
        }
        if let Some(properties) = &self.options.super_properties {
            builder = builder.header("X-Super-Properties", properties);
        }

        if request.is_multipart() {
            let mut form = Form::new();
            for (index, file) in request.files.iter().enumerate() {
                let field = file
                    .field_name
                    .clone()
                    .unwrap_or_else(|| format!("files[{index}]"));
                form = form.part(
                    field,
                    Part::bytes(file.contents.clone()).file_name(file.name.clone()),
                );
            }
            for (name, value) in request.form.iter().flatten() {
                form = form.text(name.clone(), value.clone());
            }
            if let Some(json) = &request.json {
                let payload = Part::text(serde_json::to_string(json)?).mime_str("application/json")?;
                form = form.part("payload_json", payload);
            }
            builder = builder.multipart(form);
        } else if let Some(json) = &request.json {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(json)?);
        }

        Ok(builder)
    }
}

/// Turn a final error response into a typed error
fn classify_failure(method: Method, path: &str, exchange: Exchange) -> RestError {
    let status = exchange.status.as_u16();
    let error = match exchange
        .body
        .as_json()
        .and_then(|body| ApiError::from_body(method.as_str(), path, status, body))
    {
        Some(api) => RestError::Api(api),
        None => RestError::Http(HttpError {
            status,
            status_text: exchange
                .status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            method: method.as_str().to_string(),
            path: path.to_string(),
            body: exchange.body.into_json(),
        }),
    };

    tracing::debug!(method = method.as_str(), path, status, error = %error, "Request failed");
    error
}

/// Derive bucket state from response headers
fn rate_limit_outcome(
    route: &str,
    headers: &RateLimitHeaders,
    bucket_limit: u32,
    time_offset: i64,
    now: i64,
) -> RateLimitOutcome {
    let missing_limit = headers.limit.is_none() && bucket_limit == 1;
    let remaining = headers.remaining.unwrap_or(1);
    let mut global_block_ms = None;

    let reset = if headers.global {
        let after = headers.reset_after_ms.unwrap_or(0);
        global_block_ms = Some(after.max(1));
        None
    } else if let Some(after) = headers.reset_after_ms.filter(|ms| *ms >= 0) {
        Some(after.max(1) + now)
    } else if let Some(mut reset_at) = headers.reset_at_ms {
        // Reaction endpoints report a one-second window that actually clears after ~250ms
        if route.ends_with("/reactions/:id")
            && headers
                .server_date_ms
                .is_some_and(|date| reset_at - date == 1000)
        {
            reset_at = now + 250;
        }
        Some((reset_at - time_offset).max(now))
    } else {
        Some(now)
    };

    RateLimitOutcome {
        update: BucketUpdate {
            limit: headers.limit,
            remaining,
            reset,
        },
        global_block_ms,
        missing_limit,
    }
}

/// Milliseconds to wait before retrying a 429
#[allow(clippy::cast_possible_truncation)]
fn retry_delay(headers: &RateLimitHeaders, body: &ResponseBody) -> i64 {
    let shared = headers
        .is_shared()
        .then(|| body.as_json()?.get("retry_after")?.as_f64())
        .flatten()
        .map(|seconds| (seconds * 1000.0).round() as i64);

    shared.or(headers.reset_after_ms).unwrap_or(0).max(0)
}

/// Percent-encode an audit log reason
fn encode_reason(reason: &str) -> String {
    url::form_urlencoded::byte_serialize(reason.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
