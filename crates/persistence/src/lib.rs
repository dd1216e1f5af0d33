#![warn(clippy::unwrap_used)]

pub mod bridge;
pub mod client;
pub mod keys;
pub mod rehydrate;
pub mod sink;

pub use bridge::{reset_campaign, run_change_listener, run_shard_flusher};
pub use client::RedisMirror;
pub use rehydrate::rehydrate_campaign;
pub use sink::RedisEventSink;
