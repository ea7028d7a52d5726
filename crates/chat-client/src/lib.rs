//! # chat-client
//!
//! One [`Client`] owns a REST dispatcher, an optional shard manager and the
//! event bus both report to.

pub mod client;
pub mod error;

// Re-export commonly used types at crate root
pub use client::Client;
pub use error::{ClientError, ClientResult};

pub use chat_common::{ClientConfig, EventEmitter};
pub use chat_core::{ClientEvent, Intents, RequestEvent, Snowflake};
pub use chat_gateway::{Shard, ShardEvent, ShardEventSender, ShardFactory, ShardSpec, ShardStatus};
pub use chat_rest::{Auth, FileAttachment, ResponseBody, RestError, RestRequest};
