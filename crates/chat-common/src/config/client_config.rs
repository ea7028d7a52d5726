//! Client configuration structs
//!
//! Loads configuration from environment variables and `.env` files.

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    /// Default authorization header value (already carries its scheme prefix)
    #[serde(default)]
    pub token: Option<String>,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// REST request handler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// `None` disables the per-call timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
    /// Clock drift beyond this many milliseconds raises a warning
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: i64,
    /// Seed value for the rolling latency average
    #[serde(default)]
    pub ratelimiter_offset_ms: i64,
    #[serde(default)]
    pub super_properties: Option<String>,
}

impl RestConfig {
    /// Per-call timeout as a `Duration`
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout_ms(),
            latency_threshold_ms: default_latency_threshold_ms(),
            ratelimiter_offset_ms: 0,
            super_properties: None,
        }
    }
}

/// Number of shards to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShardCount {
    /// Use the count recommended by the gateway metadata endpoint
    #[default]
    Auto,
    Fixed(u32),
}

/// Gateway sharding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub shard_count: ShardCount,
    #[serde(default)]
    pub first_shard_id: u32,
    /// Defaults to `shard_count - 1` once the count is known
    #[serde(default)]
    pub last_shard_id: Option<u32>,
    /// Identify concurrency; `None` resolves it from session start limits
    #[serde(default)]
    pub concurrency: Option<u32>,
    /// Intent names or decimal masks, resolved by `chat_core::Intents::from_names`
    #[serde(default = "default_intent_names")]
    pub intent_names: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            shard_count: ShardCount::Auto,
            first_shard_id: 0,
            last_shard_id: None,
            concurrency: None,
            intent_names: default_intent_names(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "chat-client".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_user_agent() -> String {
    format!("DiscordBot (chat-client, {})", env!("CARGO_PKG_VERSION"))
}

#[allow(clippy::unnecessary_wraps)]
fn default_request_timeout_ms() -> Option<u64> {
    Some(15_000)
}

fn default_latency_threshold_ms() -> i64 {
    30_000
}

fn default_intent_names() -> Vec<String> {
    vec!["GUILDS".to_string(), "GUILD_MESSAGES".to_string()]
}

/// Prefix bare tokens with the bot scheme
fn normalize_token(token: &str) -> String {
    let token = token.trim();
    if token.starts_with("Bot ") || token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bot {token}")
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(None),
    }
}

fn is_auto(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("auto")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: default_env(),
            },
            token: None,
            rest: RestConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration with defaults and the given token
    #[must_use]
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(normalize_token(token)),
            ..Self::default()
        }
    }

    /// The configured token, required for gateway sessions
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingVar("CHAT_TOKEN"))
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is present but malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = match lookup("APP_ENV") {
            Some(raw) => match raw.to_lowercase().as_str() {
                "production" => Environment::Production,
                "staging" => Environment::Staging,
                "development" => Environment::Development,
                _ => return Err(ConfigError::InvalidValue("APP_ENV", raw)),
            },
            None => Environment::default(),
        };

        let request_timeout_ms = match lookup("REST_REQUEST_TIMEOUT_MS") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("none") => None,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(ms) => Some(ms),
                Err(_) => return Err(ConfigError::InvalidValue("REST_REQUEST_TIMEOUT_MS", raw)),
            },
            None => default_request_timeout_ms(),
        };

        let shard_count = match lookup("GATEWAY_SHARD_COUNT") {
            Some(raw) if is_auto(&raw) => ShardCount::Auto,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => ShardCount::Fixed(n),
                _ => return Err(ConfigError::InvalidValue("GATEWAY_SHARD_COUNT", raw)),
            },
            None => ShardCount::Auto,
        };

        let concurrency = match lookup("GATEWAY_CONCURRENCY") {
            Some(raw) if is_auto(&raw) => None,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => return Err(ConfigError::InvalidValue("GATEWAY_CONCURRENCY", raw)),
            },
            None => None,
        };

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env,
            },
            token: lookup("CHAT_TOKEN")
                .filter(|t| !t.trim().is_empty())
                .map(|t| normalize_token(&t)),
            rest: RestConfig {
                base_url: lookup("REST_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(default_base_url),
                user_agent: lookup("REST_USER_AGENT").unwrap_or_else(default_user_agent),
                request_timeout_ms,
                latency_threshold_ms: parse_var(&lookup, "REST_LATENCY_THRESHOLD_MS")?
                    .unwrap_or_else(default_latency_threshold_ms),
                ratelimiter_offset_ms: parse_var(&lookup, "REST_RATELIMITER_OFFSET_MS")?
                    .unwrap_or(0),
                super_properties: lookup("REST_SUPER_PROPERTIES"),
            },
            gateway: GatewayConfig {
                shard_count,
                first_shard_id: parse_var(&lookup, "GATEWAY_FIRST_SHARD_ID")?.unwrap_or(0),
                last_shard_id: parse_var(&lookup, "GATEWAY_LAST_SHARD_ID")?,
                concurrency,
                intent_names: lookup("GATEWAY_INTENTS")
                    .map(|s| s.split(',').map(str::trim).map(String::from).collect())
                    .unwrap_or_else(default_intent_names),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
