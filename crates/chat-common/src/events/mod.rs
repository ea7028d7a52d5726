//! Client event bus

mod emitter;

pub use emitter::EventEmitter;
