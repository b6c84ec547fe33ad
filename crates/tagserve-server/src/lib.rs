//! # tagserve-server
//!
//! The tagserve monitoring engine and its WebSocket transport.
//!
//! The engine - run loop, sampler and monitored-item registry - is driven
//! by a single task that owns all subscription state. Transports and value
//! sources talk to it through a cloneable [`EngineHandle`]; sampled changes
//! flow back through per-item [`NotificationSink`]s.

pub mod engine;
pub mod monitor;
pub mod sampler;
pub mod server;

pub use engine::{Engine, EngineConfig, EngineError, EngineHandle};
pub use monitor::{
    Change, CreatedItem, ItemId, MonitorError, MonitorRegistry, MonitoredItem, NotificationSink,
    DEFAULT_SAMPLING_INTERVAL,
};
pub use sampler::Sampler;
pub use server::{ServerConfig, ServerError, TagServer};
