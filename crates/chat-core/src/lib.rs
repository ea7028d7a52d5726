//! # chat-core
//!
//! Core value types shared by the REST and gateway layers: snowflake IDs,
//! gateway intents, and the events the client raises for observers.
//! This crate has no dependency on an async runtime or HTTP stack.

pub mod events;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use events::{ClientEvent, RequestEvent};
pub use value_objects::{Intents, ParsedIntents, Snowflake, SnowflakeParseError};
