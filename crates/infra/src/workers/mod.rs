//! Background worker loops.
//!
//! Workers run on plain OS threads and consume a [`Subscription`]. They stop
//! when their [`WorkerHandle`] is shut down or the subscription disconnects.

mod partitioned;
mod subscription_worker;

pub use partitioned::PartitionedConsumer;
pub use subscription_worker::SubscriptionWorker;

use std::sync::mpsc;
use std::thread;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    joins: Vec<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, joins: Vec<thread::JoinHandle<()>>) -> Self {
        Self { shutdown, joins }
    }

    /// Request graceful shutdown and wait for every thread of the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        for j in self.joins.drain(..) {
            let _ = j.join();
        }
    }

    /// True once every worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.joins.iter().all(|j| j.is_finished())
    }
}
