//! Acknowledgement handles for durable consumption.

use thiserror::Error;

use crate::routed::Routed;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckError {
    /// The consumer the delivery belongs to is gone.
    #[error("consumer closed")]
    ConsumerClosed,

    /// The transport rejected the acknowledgement.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Transport-specific acknowledgement of one delivered message.
pub trait Acknowledger: Send {
    /// Mark the message as processed; it will not be delivered again.
    fn ack(self: Box<Self>) -> Result<(), AckError>;

    /// Request redelivery of the message.
    fn nak(self: Box<Self>) -> Result<(), AckError>;
}

/// One delivery of a message to a durable consumer.
///
/// `ack`/`nak` consume the delivery, so a delivery is settled at most once.
/// Dropping it unsettled leaves the message outstanding on the bus.
pub struct Delivery<M> {
    message: M,
    delivery_count: u32,
    acker: Box<dyn Acknowledger>,
}

impl<M> Delivery<M> {
    pub fn new(message: M, delivery_count: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            delivery_count,
            acker,
        }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// How many times this message has been delivered (1 on first delivery).
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub fn ack(self) -> Result<(), AckError> {
        self.acker.ack()
    }

    pub fn nak(self) -> Result<(), AckError> {
        self.acker.nak()
    }
}

impl<M: core::fmt::Debug> core::fmt::Debug for Delivery<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

impl<M: Routed> Routed for Delivery<M> {
    fn subject(&self) -> &str {
        self.message.subject()
    }
}
