//! # chat-common
//!
//! Shared utilities including configuration, telemetry, and the client event bus.

pub mod config;
pub mod events;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ClientConfig, ConfigError, Environment, GatewayConfig, RestConfig, ShardCount,
};
pub use events::EventEmitter;
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
