use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use stockflow_events::Subscription;

use super::WorkerHandle;

pub(crate) const TICK: Duration = Duration::from_millis(250);

/// Single-threaded worker loop.
///
/// - Applies `handler` to each message in arrival order
/// - Handler errors are logged; the loop keeps going
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct SubscriptionWorker;

impl SubscriptionWorker {
    /// Spawn a worker thread that processes messages from `sub`.
    pub fn spawn<M, H, E>(name: &str, sub: Subscription<M>, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let worker = name.to_string();

        let join = thread::Builder::new()
            .name(worker.clone())
            .spawn(move || worker_loop(&worker, sub, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle::new(shutdown_tx, vec![join]))
    }
}

fn worker_loop<M, H, E>(name: &str, sub: Subscription<M>, shutdown_rx: mpsc::Receiver<()>, handler: &mut H)
where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(TICK) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = %err, "worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn processes_messages_in_order_and_survives_handler_errors() {
        let (tx, rx) = mpsc::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = SubscriptionWorker::spawn("test-worker", Subscription::new(rx), move |n: u32| {
            sink.lock().unwrap().push(n);
            if n == 2 { Err("boom") } else { Ok(()) }
        })
        .unwrap();

        for n in 1..=4 {
            tx.send(n).unwrap();
        }
        drop(tx);

        // Disconnect ends the loop once the queue is drained.
        for _ in 0..40 {
            if handle.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn shutdown_stops_idle_worker() {
        let (_tx, rx) = mpsc::channel::<u32>();
        let handle =
            SubscriptionWorker::spawn("idle-worker", Subscription::new(rx), |_n| Ok::<(), String>(()))
                .unwrap();
        handle.shutdown();
    }
}
