//! Test helpers for integration tests
//!
//! Provides a scripted mock of the REST API: responses are queued per path,
//! and every request that reaches the server is recorded with its arrival
//! time.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chat_common::{ClientConfig, EventEmitter, RestConfig};
use chat_core::ClientEvent;
use chat_rest::{RequestHandler, RequestHandlerOptions};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Token the mock expects on authenticated routes
pub const TEST_TOKEN: &str = "Bot test-token";

/// One scripted response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub raw: Option<(String, Vec<u8>)>,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
            raw: None,
            delay: None,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::status(status)
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    /// A non-JSON body with the given content type
    pub fn raw(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: Some((content_type.to_string(), body.into())),
            ..Self::status(status)
        }
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request as the mock received it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub arrived_at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Default)]
struct MockState {
    /// Responses consumed in order, per path
    scripted: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    /// Fallback once a path's script runs out
    always: Mutex<HashMap<String, MockResponse>>,
    recorded: Mutex<Vec<RecordedRequest>>,
}

/// Mock REST API bound to an ephemeral local port
pub struct MockApi {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockApi {
    /// Start a new mock server
    pub async fn start() -> Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(respond).with_state(Arc::clone(&state));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Get base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue a one-shot response for `path`
    pub fn enqueue(&self, path: &str, response: MockResponse) {
        self.state
            .scripted
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Answer `path` with `response` whenever nothing is queued
    pub fn always(&self, path: &str, response: MockResponse) {
        self.state.always.lock().insert(path.to_string(), response);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.recorded.lock().clone()
    }

    /// Requests received for `path`
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// REST settings pointing at this mock
    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.base_url(),
            request_timeout_ms: Some(5_000),
            ..RestConfig::default()
        }
    }

    /// Client settings pointing at this mock, authenticated with [`TEST_TOKEN`]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            token: Some(TEST_TOKEN.to_string()),
            rest: self.rest_config(),
            ..ClientConfig::default()
        }
    }

    /// A handler against this mock plus its event bus
    pub fn handler(&self) -> Result<(RequestHandler, EventEmitter)> {
        self.handler_with(|_| {})
    }

    /// A handler with adjusted options
    pub fn handler_with(
        &self,
        adjust: impl FnOnce(&mut RequestHandlerOptions),
    ) -> Result<(RequestHandler, EventEmitter)> {
        let mut options = RequestHandlerOptions::from(&self.rest_config());
        adjust(&mut options);
        let events = EventEmitter::default();
        let handler = RequestHandler::new(options, Some(TEST_TOKEN.to_string()), events.clone())?;
        Ok((handler, events))
    }
}

async fn respond(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    state.recorded.lock().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        headers,
        body: body.to_vec(),
        arrived_at: Instant::now(),
    });

    let scripted = state
        .scripted
        .lock()
        .get_mut(&path)
        .and_then(VecDeque::pop_front);
    let response = scripted
        .or_else(|| state.always.lock().get(&path).cloned())
        .unwrap_or_else(|| MockResponse::json(404, serde_json::json!({"message": "404: Not Found", "code": 0})));

    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let mut header_map = HeaderMap::new();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            header_map.insert(name, value);
        }
    }
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match (response.body, response.raw) {
        (Some(json), _) => (status, header_map, Json(json)).into_response(),
        (None, Some((content_type, bytes))) => {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                header_map.insert(axum::http::header::CONTENT_TYPE, value);
            }
            (status, header_map, bytes).into_response()
        }
        (None, None) => (status, header_map).into_response(),
    }
}

/// Wait for the first event matching `predicate`
pub async fn next_event(
    rx: &mut broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> Result<ClientEvent> {
    let found = tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("event bus closed")
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for event"))??;
    Ok(found)
}

/// Milliseconds between two recorded arrivals
pub fn gap_ms(earlier: &RecordedRequest, later: &RecordedRequest) -> u128 {
    later
        .arrived_at
        .saturating_duration_since(earlier.arrived_at)
        .as_millis()
}
