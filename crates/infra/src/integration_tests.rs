//! Integration tests for the full stock pipeline.
//!
//! Tests: EventBus → LedgerUpdater → KeyValueStore → change feed → LowStockWatcher → EventBus
//!
//! Verifies:
//! - Stock changes fold into the ledger and trigger low-stock alerts
//! - Durable consumption replays events published before the consumer attached
//! - Redelivered messages are applied once
//! - Partitioned workers keep every product's ledger exact

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::Value as JsonValue;

    use stockflow_core::{ProductName, WarehouseId};
    use stockflow_events::{EventBus, EventEnvelope, InMemoryEventBus, SubjectFilter, Subscription};
    use stockflow_inventory::{
        LowStock, LowStockRule, NegativeStockPolicy, STOCK_LOW, StockEvent, StockGenerator,
        StockReplenished, StockSold,
    };

    use crate::alerts::LowStockWatcher;
    use crate::kv::{InMemoryKeyValueStore, KeyValueStore};
    use crate::ledger::{InMemoryProcessedMessages, LedgerUpdater};
    use crate::pipeline::{start_ledger_updater, start_low_stock_watcher};
    use crate::workers::WorkerHandle;

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

    struct Pipeline {
        bus: Arc<Bus>,
        store: Arc<InMemoryKeyValueStore>,
        alerts: Subscription<EventEnvelope<JsonValue>>,
        workers: Vec<WorkerHandle>,
    }

    impl Pipeline {
        fn shutdown(self) {
            for w in self.workers {
                w.shutdown();
            }
        }
    }

    fn warehouse() -> WarehouseId {
        WarehouseId::parse("46").unwrap()
    }

    fn apples() -> ProductName {
        ProductName::parse("Apples").unwrap()
    }

    fn replenished(product: ProductName, quantity: i64) -> EventEnvelope<JsonValue> {
        StockEvent::Replenished(StockReplenished {
            product_name: product,
            quantity,
        })
        .to_envelope(&warehouse())
        .unwrap()
    }

    fn sold(product: ProductName, quantity: i64) -> EventEnvelope<JsonValue> {
        StockEvent::Sold(StockSold {
            product_name: product,
            quantity,
        })
        .to_envelope(&warehouse())
        .unwrap()
    }

    fn start_updater(bus: &Arc<Bus>, store: &Arc<InMemoryKeyValueStore>, workers: usize) -> WorkerHandle {
        let updater = LedgerUpdater::new(
            Arc::clone(store),
            Arc::new(InMemoryProcessedMessages::default()),
            NegativeStockPolicy::Allow,
        );
        start_ledger_updater(bus, Arc::new(updater), "stock_updater", workers).unwrap()
    }

    fn setup() -> Pipeline {
        let bus = Arc::new(Bus::new());
        let store = Arc::new(InMemoryKeyValueStore::new());

        // Subscribe to alerts BEFORE any events are published
        let alerts = bus.subscribe(&SubjectFilter::parse("product.>").unwrap());

        let watcher = LowStockWatcher::new(Arc::clone(&bus), LowStockRule::default());
        let watcher_handle = start_low_stock_watcher(&store, watcher).unwrap();
        let updater_handle = start_updater(&bus, &store, 4);

        Pipeline {
            bus,
            store,
            alerts,
            workers: vec![watcher_handle, updater_handle],
        }
    }

    /// Poll the ledger until `key` holds `expected` (or time out).
    fn wait_for_value(store: &InMemoryKeyValueStore, key: &str, expected: &str) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let current = store.get(key).unwrap().map(|e| e.value);
            if current.as_deref() == Some(expected) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {key}={expected}, last saw {current:?}"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Poll the durable consumer until `expected` messages are acknowledged.
    fn wait_for_acked(bus: &Bus, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let info = bus.consumer_info("stock_updater").unwrap_or_default();
            if info.acked == expected && info.pending == 0 {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for acks, last saw {info:?}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn next_alert(alerts: &Subscription<EventEnvelope<JsonValue>>) -> LowStock {
        let envelope = alerts.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(envelope.event_type(), STOCK_LOW);
        envelope.decode().unwrap()
    }

    fn no_alert(alerts: &Subscription<EventEnvelope<JsonValue>>) {
        assert!(alerts.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn apples_scenario_updates_ledger_and_alerts() {
        let p = setup();

        p.bus.publish(replenished(apples(), 50)).unwrap();
        wait_for_value(&p.store, "Apples", "50");
        no_alert(&p.alerts);

        p.bus.publish(sold(apples(), 45)).unwrap();
        wait_for_value(&p.store, "Apples", "5");
        let alert = next_alert(&p.alerts);
        assert_eq!(alert.product_name, apples());

        p.bus.publish(sold(apples(), 1)).unwrap();
        wait_for_value(&p.store, "Apples", "4");
        let alert = next_alert(&p.alerts);
        assert_eq!(alert.product_name, apples());

        wait_for_acked(&p.bus, 3);

        p.shutdown();
    }

    #[test]
    fn alerts_are_published_on_the_product_subject() {
        let p = setup();
        let pears = ProductName::parse("Pears").unwrap();
        let pears_alerts = p.bus.subscribe(&SubjectFilter::parse("product.Pears").unwrap());

        p.bus.publish(replenished(pears.clone(), 3)).unwrap();
        wait_for_value(&p.store, "Pears", "3");

        let envelope = pears_alerts.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(envelope.subject(), "product.Pears");

        p.shutdown();
    }

    #[test]
    fn events_published_before_the_updater_attaches_are_replayed() {
        let bus = Arc::new(Bus::new());
        let store = Arc::new(InMemoryKeyValueStore::new());

        bus.publish(replenished(apples(), 20)).unwrap();
        bus.publish(sold(apples(), 7)).unwrap();

        let handle = start_updater(&bus, &store, 2);
        wait_for_value(&store, "Apples", "13");
        handle.shutdown();
    }

    #[test]
    fn restarted_updater_does_not_reapply_acknowledged_events() {
        let bus = Arc::new(Bus::new());
        let store = Arc::new(InMemoryKeyValueStore::new());

        let first = start_updater(&bus, &store, 2);
        bus.publish(replenished(apples(), 30)).unwrap();
        wait_for_value(&store, "Apples", "30");
        first.shutdown();

        bus.publish(sold(apples(), 10)).unwrap();
        let second = start_updater(&bus, &store, 2);
        wait_for_value(&store, "Apples", "20");
        second.shutdown();

        wait_for_acked(&bus, 2);
    }

    #[test]
    fn duplicate_message_ids_are_applied_once() {
        let p = setup();
        let sale = sold(apples(), 5);

        p.bus.publish(replenished(apples(), 40)).unwrap();
        wait_for_value(&p.store, "Apples", "40");

        // Same envelope (same message id) delivered twice.
        p.bus.publish(sale.clone()).unwrap();
        p.bus.publish(sale).unwrap();
        p.bus.publish(replenished(apples(), 1)).unwrap();

        wait_for_value(&p.store, "Apples", "36");
        p.shutdown();
    }

    #[test]
    fn generated_traffic_matches_generator_counters() {
        let p = setup();
        let mut generator = StockGenerator::demo();
        let mut rng = StdRng::seed_from_u64(46);

        for _ in 0..400 {
            let event = generator.tick(&mut rng);
            p.bus.publish(event.to_envelope(&warehouse()).unwrap()).unwrap();
        }

        for product in generator.products().to_vec() {
            if let Some(expected) = generator.on_hand(&product) {
                wait_for_value(&p.store, product.as_str(), &expected.to_string());
            }
        }

        wait_for_acked(&p.bus, 400);
        p.shutdown();
    }
}
