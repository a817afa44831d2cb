//! Infrastructure event bus implementations.
//!
//! The bus abstractions live in `stockflow-events` as pure mechanics.
//! This module provides the Redis-backed implementations.

#[cfg(feature = "redis")]
pub mod redis_pubsub;
#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
