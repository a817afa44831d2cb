//! Event source loop: ticks the generator and publishes stock events.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use stockflow_core::WarehouseId;
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::StockGenerator;

/// Publish one generated event every `tick` until `shutdown` resolves (or
/// `max_ticks` is reached).
///
/// `shutdown` is polled for the whole run, so a signal that lands while a
/// publish is in flight stops the loop at the next tick.
///
/// Publish failures are logged and the loop carries on; the generator's
/// counter already moved, so a lost event only makes later quantities less
/// plausible.
pub async fn run_generator<B>(
    bus: &B,
    mut generator: StockGenerator,
    warehouse: &WarehouseId,
    tick: Duration,
    max_ticks: Option<u64>,
    shutdown: impl Future<Output = anyhow::Result<()>>,
) -> anyhow::Result<u64>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    tokio::pin!(shutdown);
    let mut rng = StdRng::from_entropy();
    let mut interval = tokio::time::interval(tick);
    let mut ticks = 0u64;
    let mut published = 0u64;

    loop {
        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }

        tokio::select! {
            biased;
            signal = &mut shutdown => {
                signal?;
                break;
            }
            _ = interval.tick() => {}
        }

        ticks += 1;
        let event = generator.tick(&mut rng);
        let envelope = event
            .to_envelope(warehouse)
            .context("failed to encode stock event")?;

        match bus.publish(envelope.clone()) {
            Ok(()) => {
                published += 1;
                info!(
                    subject = envelope.subject(),
                    event_type = envelope.event_type(),
                    message_id = %envelope.message_id(),
                    product = %event.product_name(),
                    quantity = event.quantity(),
                    "stock event published"
                );
            }
            Err(e) => warn!(subject = envelope.subject(), error = %e, "failed to publish stock event"),
        }
    }

    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future;

    use stockflow_events::{InMemoryEventBus, SubjectFilter};

    fn warehouse() -> WarehouseId {
        WarehouseId::parse("46").unwrap()
    }

    #[tokio::test]
    async fn stops_after_max_ticks() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sub = bus.subscribe(&SubjectFilter::parse("warehouse.46.>").unwrap());

        let published = run_generator(
            &bus,
            StockGenerator::demo(),
            &warehouse(),
            Duration::from_millis(1),
            Some(5),
            future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(published, 5);
        for _ in 0..5 {
            let envelope = sub.try_recv().unwrap();
            assert!(envelope.subject().starts_with("warehouse.46.product."));
        }
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn resolved_shutdown_stops_before_publishing() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sub = bus.subscribe(&SubjectFilter::all());

        let published = run_generator(
            &bus,
            StockGenerator::demo(),
            &warehouse(),
            Duration::from_millis(1),
            None,
            future::ready(Ok(())),
        )
        .await
        .unwrap();

        assert_eq!(published, 0);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_is_observed_across_ticks() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let wh = warehouse();
        let run = run_generator(
            &bus,
            StockGenerator::demo(),
            &wh,
            Duration::from_millis(5),
            None,
            async move {
                rx.await.context("shutdown sender dropped")?;
                Ok(())
            },
        );
        let stop = async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(()).unwrap();
        };

        let (published, ()) = tokio::join!(run, stop);
        let published = published.unwrap();
        assert!(published >= 1, "published {published}");
    }

    #[tokio::test]
    async fn failed_shutdown_listener_is_an_error() {
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();

        let result = run_generator(
            &bus,
            StockGenerator::demo(),
            &warehouse(),
            Duration::from_millis(1),
            None,
            future::ready(Err(anyhow::anyhow!("no signal handler"))),
        )
        .await;

        assert!(result.is_err());
    }
}
