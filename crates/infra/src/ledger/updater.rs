//! Ledger updater: applies stock deltas to the per-product ledger.
//!
//! The handler is safe to run concurrently. Writes are compare-and-swap on
//! the key's revision, so two deltas for the same product racing each other
//! cannot lose an update; the loser re-reads and retries. Applied message ids
//! are recorded so a redelivered event is not folded twice.
//!
//! Acknowledgement rules:
//! - not a stock change, malformed body, duplicate, policy rejection: ack
//! - applied: ack after the write succeeded
//! - store failure (including a malformed stored value): nak, so the bus
//!   redelivers

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use stockflow_core::{ExpectedRevision, MessageId, ProductName};
use stockflow_events::{AckError, Delivery, EventEnvelope};
use stockflow_inventory::{
    LedgerRejection, MalformedQuantity, NegativeStockPolicy, StockDelta, apply_delta,
    encode_quantity, parse_quantity,
};

use crate::kv::{KeyValueStore, KvError};
use crate::ledger::processed::{ProcessedError, ProcessedMessages};

/// Compare-and-swap attempts before giving up on a contended key.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] KvError),

    #[error(transparent)]
    Dedup(#[from] ProcessedError),

    #[error("ledger value for {product} is malformed: {source}")]
    MalformedValue {
        product: ProductName,
        #[source]
        source: MalformedQuantity,
    },

    #[error("gave up on {product} after {attempts} conflicting writes")]
    Contended { product: ProductName, attempts: u32 },

    #[error("failed to acknowledge delivery: {0}")]
    Ack(#[from] AckError),
}

/// What happened to one stock-change message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        product: ProductName,
        delta: i64,
        quantity: i64,
        revision: u64,
    },
    /// Not a stock change (unknown `type` header).
    Ignored,
    /// Body could not be decoded into a stock change.
    Malformed(String),
    /// The message id was already applied.
    Duplicate,
    /// The negative-stock policy refused the delta.
    Rejected(LedgerRejection),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

#[derive(Debug)]
pub struct LedgerUpdater<S, P> {
    store: S,
    processed: P,
    policy: NegativeStockPolicy,
    max_attempts: u32,
}

impl<S, P> LedgerUpdater<S, P>
where
    S: KeyValueStore,
    P: ProcessedMessages,
{
    pub fn new(store: S, processed: P, policy: NegativeStockPolicy) -> Self {
        Self {
            store,
            processed,
            policy,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn policy(&self) -> NegativeStockPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current ledger quantity of a product (absent key reads as 0).
    pub fn quantity(&self, product: &ProductName) -> Result<i64, LedgerError> {
        match self.store.get(product.as_str())? {
            None => Ok(0),
            Some(entry) => parse_quantity(&entry.value).map_err(|source| LedgerError::MalformedValue {
                product: product.clone(),
                source,
            }),
        }
    }

    /// Process one delivery and settle it with the bus.
    pub fn handle(&self, delivery: Delivery<EventEnvelope<JsonValue>>) -> Result<ApplyOutcome, LedgerError> {
        let envelope = delivery.message();
        let message_id = envelope.message_id();

        match self.apply(envelope) {
            Ok(outcome) => {
                delivery.ack()?;
                Ok(outcome)
            }
            Err(err) => {
                error!(
                    message_id = %message_id,
                    subject = envelope.subject(),
                    delivery_count = delivery.delivery_count(),
                    error = %err,
                    "ledger update failed; requesting redelivery"
                );
                if let Err(nak_err) = delivery.nak() {
                    warn!(message_id = %message_id, error = %nak_err, "nak failed");
                }
                Err(err)
            }
        }
    }

    /// Apply one envelope to the ledger without acknowledging anything.
    ///
    /// `Ok` means the message is settled (applied or deliberately dropped);
    /// `Err` means it must be retried.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<ApplyOutcome, LedgerError> {
        let message_id = envelope.message_id();

        let delta = match StockDelta::from_envelope(envelope) {
            Ok(Some(delta)) => delta,
            Ok(None) => {
                debug!(
                    message_id = %message_id,
                    event_type = envelope.event_type(),
                    "ignoring non-stock message"
                );
                return Ok(ApplyOutcome::Ignored);
            }
            Err(err) => {
                warn!(
                    message_id = %message_id,
                    subject = envelope.subject(),
                    error = %err,
                    "dropping malformed stock event"
                );
                return Ok(ApplyOutcome::Malformed(err.to_string()));
            }
        };

        if self.processed.contains(&message_id)? {
            info!(
                message_id = %message_id,
                product = %delta.product_name(),
                "skipping already applied stock event"
            );
            return Ok(ApplyOutcome::Duplicate);
        }

        let outcome = self.fold(&delta)?;

        match &outcome {
            ApplyOutcome::Applied {
                product,
                delta,
                quantity,
                revision,
            } => {
                self.remember(&message_id);
                info!(
                    message_id = %message_id,
                    product = %product,
                    delta,
                    quantity,
                    revision,
                    "stock updated"
                );
            }
            ApplyOutcome::Rejected(rejection) => {
                warn!(
                    message_id = %message_id,
                    product = %delta.product_name(),
                    reason = %rejection,
                    "stock event rejected by negative stock policy"
                );
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Read-modify-write with compare-and-swap, retried on conflict.
    fn fold(&self, delta: &StockDelta) -> Result<ApplyOutcome, LedgerError> {
        let product = delta.product_name();
        let key = product.as_str();

        for attempt in 1..=self.max_attempts {
            let (current, expected) = match self.store.get(key)? {
                None => (0, ExpectedRevision::NoEntry),
                Some(entry) => {
                    let current = parse_quantity(&entry.value).map_err(|source| {
                        LedgerError::MalformedValue {
                            product: product.clone(),
                            source,
                        }
                    })?;
                    (current, ExpectedRevision::Exact(entry.revision))
                }
            };

            let next = match apply_delta(current, delta.signed(), self.policy) {
                Ok(next) => next,
                Err(rejection) => return Ok(ApplyOutcome::Rejected(rejection)),
            };

            match self.store.update(key, &encode_quantity(next), expected) {
                Ok(revision) => {
                    return Ok(ApplyOutcome::Applied {
                        product: product.clone(),
                        delta: delta.signed(),
                        quantity: next,
                        revision,
                    });
                }
                Err(err) if err.is_conflict() => {
                    debug!(product = %product, attempt, "ledger write conflicted; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(LedgerError::Contended {
            product: product.clone(),
            attempts: self.max_attempts,
        })
    }

    fn remember(&self, message_id: &MessageId) {
        // The write already landed; a nak here would apply the delta twice.
        if let Err(err) = self.processed.record(message_id) {
            warn!(message_id = %message_id, error = %err, "failed to record applied message id");
        }
    }
}
