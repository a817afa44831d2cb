//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern**: a subject-addressed pub/sub
//! mechanism for distributing messages to consumers (the ledger updater, the
//! low-stock watcher, alert consumers, ...).
//!
//! ## Design Philosophy
//!
//! The event bus is intentionally **lightweight** and makes minimal assumptions:
//!
//! - **Transport-agnostic**: Works with in-memory channels, Redis pub/sub, Redis Streams, etc.
//! - **At-least-once delivery** (durable consumers): messages may be delivered more than
//!   once; consumers must be idempotent
//! - **No global ordering**: messages for different subjects may interleave arbitrarily
//!
//! Two shapes of consumption are offered:
//!
//! - [`EventBus::subscribe`]: fire-and-forget fan-out. Every live subscriber whose
//!   filter matches gets a copy; nothing is retained for absent subscribers.
//! - [`DurableEventBus::consume`]: a named durable consumer. Every matching message is
//!   retained until the consumer acknowledges it through its [`Delivery`].

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::delivery::Delivery;
use crate::subject::SubjectFilter;

/// A subscription to a message stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = bus.subscribe(&SubjectFilter::parse("product.*")?);
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(message) => process(message)?,
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Bus closed
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption. Fan work out to
/// other threads explicitly (see the infra workers).
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Subject-addressed pub/sub bus.
///
/// `publish()` can fail (e.g. network error). Failures are surfaced to the
/// caller, which decides whether to retry, log or abort.
///
/// The trait requires `Send + Sync`: multiple threads may publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Live fan-out subscription to messages whose subject matches `filter`.
    fn subscribe(&self, filter: &SubjectFilter) -> Subscription<M>;
}

/// Configuration of a named durable consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub name: String,
    pub filter: SubjectFilter,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>, filter: SubjectFilter) -> Self {
        Self {
            name: name.into(),
            filter,
        }
    }
}

/// Bus with durable, acknowledged consumption.
///
/// A consumer with a given name sees every matching message published to the
/// bus, including those published before it first attached. A message stays
/// outstanding until its [`Delivery`] is acknowledged; negative
/// acknowledgement (or, for networked buses, an expired ack deadline)
/// causes redelivery.
pub trait DurableEventBus<M>: EventBus<M> {
    fn consume(&self, config: &ConsumerConfig) -> Result<Subscription<Delivery<M>>, Self::Error>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self, filter: &SubjectFilter) -> Subscription<M> {
        (**self).subscribe(filter)
    }
}

impl<M, B> DurableEventBus<M> for Arc<B>
where
    B: DurableEventBus<M> + ?Sized,
{
    fn consume(&self, config: &ConsumerConfig) -> Result<Subscription<Delivery<M>>, Self::Error> {
        (**self).consume(config)
    }
}
