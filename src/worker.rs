//! Replica-side IPC slot handlers.
//!
//! One thread per slot, mirrored across every replica: all replicas' thread
//! `i` wait on slot `i`'s request semaphore, and whichever wins takes the
//! request. Post-payment intake only enqueues; summary and purge answer
//! through the response rendezvous.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ipc::IpcConnection;
use crate::ipc::protocol::{IpcRequest, TIME_UNBOUNDED_FROM, TIME_UNBOUNDED_TO};
use crate::pending::PendingPaymentsQueue;
use crate::shutdown::ShutdownSignal;
use crate::store::PaymentStore;
use crate::types::{PaymentsSummary, PendingPayment};

/// How often a blocked worker wakes to check for shutdown.
const REQUEST_WAIT_SLICE: Duration = Duration::from_millis(100);

pub struct WorkerPool {
    ipc: Arc<IpcConnection>,
    store: Arc<PaymentStore>,
    queue: Arc<PendingPaymentsQueue>,
    shutdown: Arc<ShutdownSignal>,
}

impl WorkerPool {
    pub fn new(
        ipc: Arc<IpcConnection>,
        store: Arc<PaymentStore>,
        queue: Arc<PendingPaymentsQueue>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            ipc,
            store,
            queue,
            shutdown,
        }
    }

    /// Spawn one handler thread per IPC slot.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.ipc.slots())
            .map(|slot_index| {
                let pool = Arc::clone(&self);
                std::thread::Builder::new()
                    .name(format!("ipc-worker-{slot_index}"))
                    .spawn(move || pool.run(slot_index))
                    .expect("spawning ipc worker thread")
            })
            .collect()
    }

    fn run(&self, slot_index: usize) {
        tracing::info!(slot = slot_index, "IPC worker started");
        let slot = self.ipc.slot(slot_index);

        while !self.shutdown.is_shutdown_requested() {
            if !slot.request_ready.wait_timeout(REQUEST_WAIT_SLICE) {
                continue;
            }

            match slot.take_request() {
                IpcRequest::PostPayment {
                    amount,
                    correlation_id,
                } => {
                    self.queue.enqueue(
                        PendingPayment {
                            amount,
                            correlation_id,
                        },
                        &self.shutdown,
                    );
                }

                IpcRequest::PaymentsSummary { from, to } => {
                    let from = (from != TIME_UNBOUNDED_FROM).then_some(from);
                    let to = (to != TIME_UNBOUNDED_TO).then_some(to);

                    let summary = match self.store.payments_summary(from, to) {
                        Ok(summary) => summary,
                        Err(error) => {
                            tracing::error!(%error, "Payments summary failed");
                            PaymentsSummary::default()
                        }
                    };
                    slot.send_response(summary);
                }

                IpcRequest::PurgePayments => {
                    if let Err(error) = self.store.purge() {
                        tracing::error!(%error, "Purge failed");
                    }
                    self.queue.purge();
                    slot.acknowledge();
                }
            }
        }

        tracing::info!(slot = slot_index, "IPC worker stopped");
    }
}
