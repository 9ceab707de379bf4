//! Pending-payments queue decoupling HTTP acceptance from upstream submit.
//!
//! A large-bounded lock-free ring (crossbeam `ArrayQueue`), multi-producer
//! (IPC worker threads) / multi-consumer (payment processors). Producers
//! spin with backpressure when full; consumers spin briefly and then sleep
//! while idle so a drained queue costs no CPU.

use std::time::Duration;

use crossbeam_queue::ArrayQueue;

use crate::shutdown::ShutdownSignal;
use crate::types::PendingPayment;

/// Sized for bursts well above the benchmark's in-flight volume.
pub const PENDING_QUEUE_CAPACITY: usize = 65_536;

const IDLE_SPIN_LIMIT: u32 = 1000;
const IDLE_SLEEP: Duration = Duration::from_micros(100);

pub struct PendingPaymentsQueue {
    queue: ArrayQueue<PendingPayment>,
}

impl PendingPaymentsQueue {
    pub fn new() -> Self {
        Self::with_capacity(PENDING_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Push with backpressure: spin while the queue is full. Gives up (and
    /// drops the payment) only once shutdown is requested.
    pub fn enqueue(&self, payment: PendingPayment, shutdown: &ShutdownSignal) {
        let mut item = payment;
        let mut spin_count = 0u32;

        loop {
            match self.queue.push(item) {
                Ok(()) => return,
                Err(rejected) => {
                    if shutdown.is_shutdown_requested() {
                        return;
                    }
                    item = rejected;
                    spin_count += 1;
                    if spin_count > IDLE_SPIN_LIMIT {
                        std::thread::sleep(IDLE_SLEEP);
                        spin_count = 0;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            }
        }
    }

    /// Pop the next payment, blocking while the queue is empty. Returns
    /// `None` once shutdown is requested and nothing is left to take.
    pub fn dequeue(&self, shutdown: &ShutdownSignal) -> Option<PendingPayment> {
        let mut spin_count = 0u32;

        loop {
            if let Some(payment) = self.queue.pop() {
                return Some(payment);
            }
            if shutdown.is_shutdown_requested() {
                return None;
            }
            spin_count += 1;
            if spin_count > IDLE_SPIN_LIMIT {
                std::thread::sleep(IDLE_SLEEP);
                spin_count = 0;
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Discard everything currently queued.
    pub fn purge(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for PendingPaymentsQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn payment(amount: f64) -> PendingPayment {
        PendingPayment {
            amount,
            correlation_id: [b'q'; crate::types::CORRELATION_ID_LEN],
        }
    }

    #[test]
    fn fifo_for_a_single_producer() {
        let queue = PendingPaymentsQueue::new();
        let shutdown = ShutdownSignal::new();

        for amount in [1.0, 2.0, 3.0] {
            queue.enqueue(payment(amount), &shutdown);
        }

        assert_eq!(queue.dequeue(&shutdown).unwrap().amount, 1.0);
        assert_eq!(queue.dequeue(&shutdown).unwrap().amount, 2.0);
        assert_eq!(queue.dequeue(&shutdown).unwrap().amount, 3.0);
    }

    #[test]
    fn dequeue_returns_none_on_shutdown() {
        let queue = PendingPaymentsQueue::new();
        let shutdown = ShutdownSignal::new();
        shutdown.request_shutdown();
        assert!(queue.dequeue(&shutdown).is_none());
    }

    #[test]
    fn purge_discards_everything() {
        let queue = PendingPaymentsQueue::new();
        let shutdown = ShutdownSignal::new();

        for _ in 0..100 {
            queue.enqueue(payment(5.0), &shutdown);
        }
        queue.purge();
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_and_consumers_conserve_items() {
        let queue = Arc::new(PendingPaymentsQueue::with_capacity(1024));
        let shutdown = Arc::new(ShutdownSignal::new());
        const PER_PRODUCER: usize = 2_000;

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        queue.enqueue(payment(1.0), &shutdown);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || {
                    let mut taken = 0usize;
                    while queue.dequeue(&shutdown).is_some() {
                        taken += 1;
                    }
                    taken
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        // Let consumers drain the tail before signalling shutdown.
        while !queue.is_empty() {
            std::thread::yield_now();
        }
        shutdown.request_shutdown();

        let taken: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(taken, 4 * PER_PRODUCER);
    }
}
