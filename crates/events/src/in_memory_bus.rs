//! In-memory event bus for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use thiserror::Error;
use tracing::debug;

use crate::bus::{ConsumerConfig, DurableEventBus, EventBus, Subscription};
use crate::delivery::{AckError, Acknowledger, Delivery};
use crate::routed::Routed;
use crate::subject::SubjectFilter;

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("in-memory bus lock poisoned")]
    Poisoned,
}

/// Delivery counters for one durable consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// Deliveries handed out, redeliveries included.
    pub delivered: u64,
    pub acked: u64,
    pub redelivered: u64,
    /// Matching messages not yet acknowledged.
    pub pending: u64,
}

struct ConsumerState<M> {
    filter: SubjectFilter,
    sender: Mutex<Option<mpsc::Sender<Delivery<M>>>>,
    acked: Mutex<HashSet<usize>>,
    delivered: AtomicU64,
    redelivered: AtomicU64,
}

impl<M> ConsumerState<M>
where
    M: Clone + Send + 'static,
{
    /// Hand a delivery to the attached consumer. Returns `false` if detached.
    fn deliver(self: &Arc<Self>, index: usize, message: M, delivery_count: u32) -> bool {
        let acker = InMemoryAcker {
            index,
            message: message.clone(),
            delivery_count,
            state: Arc::clone(self),
        };
        let delivery = Delivery::new(message, delivery_count, Box::new(acker));

        let Ok(sender) = self.sender.lock() else {
            return false;
        };
        let sent = sender.as_ref().is_some_and(|tx| tx.send(delivery).is_ok());
        if sent {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            if delivery_count > 1 {
                self.redelivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        sent
    }
}

struct InMemoryAcker<M> {
    index: usize,
    message: M,
    delivery_count: u32,
    state: Arc<ConsumerState<M>>,
}

impl<M> Acknowledger for InMemoryAcker<M>
where
    M: Clone + Send + 'static,
{
    fn ack(self: Box<Self>) -> Result<(), AckError> {
        let mut acked = self.state.acked.lock().map_err(|_| AckError::ConsumerClosed)?;
        acked.insert(self.index);
        Ok(())
    }

    fn nak(self: Box<Self>) -> Result<(), AckError> {
        let this = *self;
        if this.state.deliver(this.index, this.message, this.delivery_count + 1) {
            Ok(())
        } else {
            // Still unacked; replayed when the consumer re-attaches.
            Err(AckError::ConsumerClosed)
        }
    }
}

struct Inner<M> {
    subscribers: Vec<(SubjectFilter, mpsc::Sender<M>)>,
    log: Vec<M>,
    consumers: HashMap<String, Arc<ConsumerState<M>>>,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Fan-out subscribers get live messages only
/// - Durable consumers see the full retained log and redeliver on `nak`
pub struct InMemoryEventBus<M> {
    inner: Mutex<Inner<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
                log: Vec::new(),
                consumers: HashMap::new(),
            }),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus").finish_non_exhaustive()
    }
}

impl<M> InMemoryEventBus<M>
where
    M: Routed + Clone + Send + 'static,
{
    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<M> {
        self.inner.lock().map(|i| i.log.clone()).unwrap_or_default()
    }

    /// Delivery counters of a durable consumer, if it was ever attached.
    pub fn consumer_info(&self, name: &str) -> Option<ConsumerInfo> {
        let inner = self.inner.lock().ok()?;
        let state = inner.consumers.get(name)?;
        let acked = state.acked.lock().ok()?.len() as u64;
        let matching = inner
            .log
            .iter()
            .filter(|m| state.filter.matches(m.subject()))
            .count() as u64;

        Some(ConsumerInfo {
            delivered: state.delivered.load(Ordering::Relaxed),
            acked,
            redelivered: state.redelivered.load(Ordering::Relaxed),
            pending: matching.saturating_sub(acked),
        })
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Routed + Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        inner.subscribers.retain(|(filter, tx)| {
            !filter.matches(message.subject()) || tx.send(message.clone()).is_ok()
        });

        let index = inner.log.len();
        inner.log.push(message.clone());

        for state in inner.consumers.values() {
            if state.filter.matches(message.subject()) {
                state.deliver(index, message.clone(), 1);
            }
        }

        Ok(())
    }

    fn subscribe(&self, filter: &SubjectFilter) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.push((filter.clone(), tx));
        }

        Subscription::new(rx)
    }
}

impl<M> DurableEventBus<M> for InMemoryEventBus<M>
where
    M: Routed + Clone + Send + 'static,
{
    fn consume(&self, config: &ConsumerConfig) -> Result<Subscription<Delivery<M>>, Self::Error> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.inner.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        let state = inner
            .consumers
            .entry(config.name.clone())
            .or_insert_with(|| {
                Arc::new(ConsumerState {
                    filter: config.filter.clone(),
                    sender: Mutex::new(None),
                    acked: Mutex::new(HashSet::new()),
                    delivered: AtomicU64::new(0),
                    redelivered: AtomicU64::new(0),
                })
            })
            .clone();

        *state.sender.lock().map_err(|_| InMemoryBusError::Poisoned)? = Some(tx);

        // Replay everything this consumer has not acknowledged yet.
        let acked = state
            .acked
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?
            .clone();
        let mut replayed = 0usize;
        for (index, message) in inner.log.iter().enumerate() {
            if !acked.contains(&index) && state.filter.matches(message.subject()) {
                state.deliver(index, message.clone(), 1);
                replayed += 1;
            }
        }
        debug!(consumer = %config.name, filter = config.filter.as_str(), replayed, "durable consumer attached");

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Msg {
        subject: String,
        body: u32,
    }

    impl Routed for Msg {
        fn subject(&self) -> &str {
            &self.subject
        }
    }

    fn msg(subject: &str, body: u32) -> Msg {
        Msg {
            subject: subject.to_string(),
            body,
        }
    }

    fn filter(pattern: &str) -> SubjectFilter {
        SubjectFilter::parse(pattern).unwrap()
    }

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn subscribers_only_receive_matching_subjects() {
        let bus = InMemoryEventBus::new();
        let products = bus.subscribe(&filter("product.*"));
        let everything = bus.subscribe(&SubjectFilter::all());

        bus.publish(msg("warehouse.46.product.Apples", 1)).unwrap();
        bus.publish(msg("product.Apples", 2)).unwrap();

        assert_eq!(products.recv_timeout(WAIT).unwrap().body, 2);
        assert!(products.try_recv().is_err());

        assert_eq!(everything.recv_timeout(WAIT).unwrap().body, 1);
        assert_eq!(everything.recv_timeout(WAIT).unwrap().body, 2);
    }

    #[test]
    fn dropped_subscribers_do_not_break_publish() {
        let bus = InMemoryEventBus::new();
        drop(bus.subscribe(&SubjectFilter::all()));
        bus.publish(msg("a", 1)).unwrap();
        bus.publish(msg("a", 2)).unwrap();
    }

    #[test]
    fn durable_consumer_replays_earlier_messages() {
        let bus = InMemoryEventBus::new();
        bus.publish(msg("warehouse.1.product.Pears", 1)).unwrap();
        bus.publish(msg("product.Pears", 2)).unwrap();

        let sub = bus
            .consume(&ConsumerConfig::new("updater", filter("warehouse.*.product.*")))
            .unwrap();

        let d = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(d.message().body, 1);
        assert_eq!(d.delivery_count(), 1);
        d.ack().unwrap();
        assert!(sub.try_recv().is_err());

        let info = bus.consumer_info("updater").unwrap();
        assert_eq!(info.acked, 1);
        assert_eq!(info.pending, 0);
    }

    #[test]
    fn nak_redelivers_with_incremented_count() {
        let bus = InMemoryEventBus::new();
        let sub = bus
            .consume(&ConsumerConfig::new("updater", SubjectFilter::all()))
            .unwrap();
        bus.publish(msg("a.b", 7)).unwrap();

        let first = sub.recv_timeout(WAIT).unwrap();
        assert!(!first.is_redelivery());
        first.nak().unwrap();

        let second = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(second.message().body, 7);
        assert_eq!(second.delivery_count(), 2);
        assert!(second.is_redelivery());
        second.ack().unwrap();

        let info = bus.consumer_info("updater").unwrap();
        assert_eq!(info.delivered, 2);
        assert_eq!(info.redelivered, 1);
        assert_eq!(info.acked, 1);
    }

    #[test]
    fn unacked_messages_are_replayed_on_reattach() {
        let bus = InMemoryEventBus::new();
        let config = ConsumerConfig::new("updater", SubjectFilter::all());

        let sub = bus.consume(&config).unwrap();
        bus.publish(msg("a", 1)).unwrap();
        bus.publish(msg("a", 2)).unwrap();

        sub.recv_timeout(WAIT).unwrap().ack().unwrap();
        // Second message received but never settled.
        let _unsettled = sub.recv_timeout(WAIT).unwrap();
        drop(sub);

        let again = bus.consume(&config).unwrap();
        let replayed = again.recv_timeout(WAIT).unwrap();
        assert_eq!(replayed.message().body, 2);
        assert!(again.try_recv().is_err());
        assert_eq!(bus.consumer_info("updater").unwrap().pending, 1);
    }

    #[test]
    fn published_log_keeps_order() {
        let bus = InMemoryEventBus::new();
        bus.publish(msg("a", 1)).unwrap();
        bus.publish(msg("b", 2)).unwrap();
        let bodies: Vec<u32> = bus.published().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec![1, 2]);
    }
}
