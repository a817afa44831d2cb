use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::{Arc, mpsc};
use std::thread;

use tracing::{debug, warn};

use stockflow_events::{Routed, Subscription};

use super::WorkerHandle;
use super::subscription_worker::TICK;

/// Subject-partitioned worker pool.
///
/// A dispatcher thread routes each message to one of `partitions` workers by
/// hashing its subject. Messages sharing a subject are therefore handled
/// sequentially and in order; different subjects proceed in parallel.
#[derive(Debug)]
pub struct PartitionedConsumer;

impl PartitionedConsumer {
    pub fn spawn<M, H, E>(
        name: &str,
        sub: Subscription<M>,
        partitions: usize,
        handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: Routed + Send + 'static,
        H: Fn(M) -> Result<(), E> + Send + Sync + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let partitions = partitions.max(1);
        let handler = Arc::new(handler);
        let mut joins = Vec::with_capacity(partitions + 1);
        let mut lanes = Vec::with_capacity(partitions);

        for i in 0..partitions {
            let (tx, rx) = mpsc::channel::<M>();
            let handler = Arc::clone(&handler);
            let worker = format!("{name}-{i}");
            let join = thread::Builder::new().name(worker.clone()).spawn(move || {
                // Drains its lane until the dispatcher drops the sender.
                while let Ok(msg) = rx.recv() {
                    if let Err(err) = handler(msg) {
                        warn!(worker = %worker, error = %err, "worker handler failed");
                    }
                }
            })?;
            lanes.push(tx);
            joins.push(join);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let dispatcher = name.to_string();
        let join = thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn(move || dispatch_loop(&dispatcher, sub, shutdown_rx, lanes))?;
        joins.push(join);

        Ok(WorkerHandle::new(shutdown_tx, joins))
    }
}

fn partition_for(subject: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    subject.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

fn dispatch_loop<M: Routed>(
    name: &str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    lanes: Vec<mpsc::Sender<M>>,
) {
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(TICK) {
            Ok(msg) => {
                let lane = partition_for(msg.subject(), lanes.len());
                if lanes[lane].send(msg).is_err() {
                    warn!(worker = name, lane, "partition worker is gone; stopping dispatcher");
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct Msg {
        subject: String,
        seq: u32,
    }

    impl Routed for Msg {
        fn subject(&self) -> &str {
            &self.subject
        }
    }

    #[test]
    fn same_subject_always_maps_to_same_partition() {
        let a = partition_for("warehouse.w1.product.Apples", 8);
        for _ in 0..10 {
            assert_eq!(partition_for("warehouse.w1.product.Apples", 8), a);
        }
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[test]
    fn preserves_order_per_subject() {
        let (tx, rx) = mpsc::channel();
        let seen: Arc<Mutex<Vec<Msg>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = PartitionedConsumer::spawn("test-pool", Subscription::new(rx), 4, move |m: Msg| {
            sink.lock().unwrap().push(m);
            Ok::<(), String>(())
        })
        .unwrap();

        for seq in 0..50 {
            for subject in ["a", "b", "c"] {
                tx.send(Msg { subject: subject.to_string(), seq }).unwrap();
            }
        }
        drop(tx);

        for _ in 0..80 {
            if handle.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }
        handle.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 150);
        for subject in ["a", "b", "c"] {
            let seqs: Vec<u32> = seen.iter().filter(|m| m.subject == subject).map(|m| m.seq).collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }
}
