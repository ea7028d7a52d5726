//! Client events - observability and lifecycle notifications

mod client_event;

pub use client_event::{ClientEvent, RequestEvent};
