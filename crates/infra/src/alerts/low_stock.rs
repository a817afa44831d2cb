//! Low-stock watcher: turns ledger writes below the threshold into alerts.
//!
//! Every put that lands below the threshold publishes a `stock.low` event to
//! `product.<name>`, even if the previous value was already low. Deletes,
//! malformed values and publish failures are logged and the feed moves on.

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use stockflow_core::ProductName;
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{LowStockRule, SkipReason, low_stock_subject};

use crate::kv::{KvChange, KvOperation};

/// What the watcher did with one change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Not a put.
    Ignored,
    Skipped(SkipReason),
    AboveThreshold,
    Alerted { product: ProductName },
    PublishFailed { product: ProductName, error: String },
}

#[derive(Debug)]
pub struct LowStockWatcher<B> {
    bus: B,
    rule: LowStockRule,
}

impl<B> LowStockWatcher<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B, rule: LowStockRule) -> Self {
        Self { bus, rule }
    }

    pub fn rule(&self) -> LowStockRule {
        self.rule
    }

    pub fn handle(&self, change: &KvChange) -> WatchOutcome {
        if change.operation != KvOperation::Put {
            debug!(key = %change.key, operation = ?change.operation, "ignoring non-put change");
            return WatchOutcome::Ignored;
        }

        let alert = match self.rule.evaluate(&change.key, &change.value) {
            Ok(Some(alert)) => alert,
            Ok(None) => return WatchOutcome::AboveThreshold,
            Err(reason) => {
                warn!(key = %change.key, revision = change.revision, reason = %reason, "skipping ledger change");
                return WatchOutcome::Skipped(reason);
            }
        };

        let product = alert.product_name.clone();
        let subject = low_stock_subject(&product);

        let published = EventEnvelope::encode(subject.as_str(), &alert)
            .map_err(|e| e.to_string())
            .and_then(|envelope| self.bus.publish(envelope).map_err(|e| e.to_string()));

        match published {
            Ok(()) => {
                info!(
                    product = %product,
                    quantity = %change.value,
                    threshold = self.rule.threshold(),
                    subject = %subject,
                    "low stock alert published"
                );
                WatchOutcome::Alerted { product }
            }
            Err(error) => {
                warn!(product = %product, error = %error, "failed to publish low stock alert");
                WatchOutcome::PublishFailed { product, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use stockflow_events::{InMemoryEventBus, SubjectFilter, Subscription};
    use stockflow_inventory::{LowStock, STOCK_LOW};

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

    fn put(key: &str, value: &str) -> KvChange {
        KvChange {
            key: key.to_string(),
            value: value.to_string(),
            revision: 1,
            operation: KvOperation::Put,
        }
    }

    fn watcher() -> (Arc<Bus>, LowStockWatcher<Arc<Bus>>) {
        let bus = Arc::new(Bus::new());
        let watcher = LowStockWatcher::new(Arc::clone(&bus), LowStockRule::default());
        (bus, watcher)
    }

    fn alerted(name: &str) -> WatchOutcome {
        WatchOutcome::Alerted {
            product: ProductName::parse(name).unwrap(),
        }
    }

    /// Bus that refuses publishes while `down` is set.
    #[derive(Default)]
    struct FlakyBus {
        inner: Bus,
        down: AtomicBool,
    }

    impl EventBus<EventEnvelope<JsonValue>> for FlakyBus {
        type Error = String;

        fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            if self.down.load(Ordering::SeqCst) {
                return Err("broker unreachable".to_string());
            }
            self.inner.publish(message).map_err(|e| e.to_string())
        }

        fn subscribe(&self, filter: &SubjectFilter) -> Subscription<EventEnvelope<JsonValue>> {
            self.inner.subscribe(filter)
        }
    }

    #[test]
    fn threshold_edge() {
        let (bus, watcher) = watcher();

        assert_eq!(watcher.handle(&put("Apples", "10")), WatchOutcome::AboveThreshold);
        assert_eq!(watcher.handle(&put("Apples", "9")), alerted("Apples"));
        assert_eq!(watcher.handle(&put("Apples", "5")), alerted("Apples"));
        assert_eq!(watcher.handle(&put("Apples", "10")), WatchOutcome::AboveThreshold);

        assert_eq!(bus.published().len(), 2);
    }

    #[test]
    fn repeated_low_values_alert_every_time() {
        let (bus, watcher) = watcher();

        assert_eq!(watcher.handle(&put("Apples", "3")), alerted("Apples"));
        assert_eq!(watcher.handle(&put("Apples", "2")), alerted("Apples"));

        let published = bus.published();
        assert_eq!(published.len(), 2);
        for envelope in &published {
            assert_eq!(envelope.subject(), "product.Apples");
            assert_eq!(envelope.event_type(), STOCK_LOW);
            let alert: LowStock = envelope.decode().unwrap();
            assert_eq!(alert.product_name.as_str(), "Apples");
        }
    }

    #[test]
    fn negative_quantities_are_low() {
        let (_bus, watcher) = watcher();
        assert_eq!(watcher.handle(&put("Pears", "-4")), alerted("Pears"));
    }

    #[test]
    fn malformed_value_is_skipped_and_next_value_still_alerts() {
        let (bus, watcher) = watcher();

        assert!(matches!(
            watcher.handle(&put("Apples", "abc")),
            WatchOutcome::Skipped(SkipReason::MalformedQuantity(_))
        ));
        assert_eq!(watcher.handle(&put("Apples", "4")), alerted("Apples"));
        assert_eq!(bus.published().len(), 1);
    }

    #[test]
    fn deletes_are_ignored() {
        let (bus, watcher) = watcher();
        let delete = KvChange {
            key: "Apples".into(),
            value: String::new(),
            revision: 7,
            operation: KvOperation::Delete,
        };

        assert_eq!(watcher.handle(&delete), WatchOutcome::Ignored);
        assert!(bus.published().is_empty());
    }

    #[test]
    fn publish_failure_does_not_stop_later_alerts() {
        let bus = Arc::new(FlakyBus::default());
        let watcher = LowStockWatcher::new(Arc::clone(&bus), LowStockRule::default());

        bus.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            watcher.handle(&put("Apples", "1")),
            WatchOutcome::PublishFailed { .. }
        ));

        bus.down.store(false, Ordering::SeqCst);
        assert_eq!(watcher.handle(&put("Apples", "0")), alerted("Apples"));
        assert_eq!(bus.inner.published().len(), 1);
    }

    #[test]
    fn alerts_are_routed_per_product() {
        let (bus, watcher) = watcher();
        let pears_only = bus.subscribe(&SubjectFilter::parse("product.Pears").unwrap());

        watcher.handle(&put("Apples", "1"));
        watcher.handle(&put("Pears", "2"));

        let got = pears_only.try_recv().unwrap();
        assert_eq!(got.subject(), "product.Pears");
        assert!(pears_only.try_recv().is_err());
    }
}
