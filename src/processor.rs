//! Payment processor: drains the pending queue into the upstreams.
//!
//! Each worker thread loops dequeue → submit → persist. A failed submit
//! flips the shared gateway choice and retries exactly once on the other
//! gateway; a second failure drops the payment (intake is fire-and-forget,
//! so there is no client to answer).

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::chooser::GatewayChooser;
use crate::pending::PendingPaymentsQueue;
use crate::shutdown::ShutdownSignal;
use crate::store::PaymentStore;
use crate::time::now_millis;
use crate::types::{Gateway, PendingPayment};
use crate::upstream::{Upstreams, blocking_client};

pub struct PaymentProcessor {
    queue: Arc<PendingPaymentsQueue>,
    store: Arc<PaymentStore>,
    chooser: Arc<GatewayChooser>,
    upstreams: Arc<Upstreams>,
    shutdown: Arc<ShutdownSignal>,
}

impl PaymentProcessor {
    pub fn new(
        queue: Arc<PendingPaymentsQueue>,
        store: Arc<PaymentStore>,
        chooser: Arc<GatewayChooser>,
        upstreams: Arc<Upstreams>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            queue,
            store,
            chooser,
            upstreams,
            shutdown,
        }
    }

    /// Spawn `count` processor threads sharing this processor's services.
    pub fn spawn(self: Arc<Self>, count: u32) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|index| {
                let processor = Arc::clone(&self);
                std::thread::Builder::new()
                    .name(format!("processor-{index}"))
                    .spawn(move || processor.run())
                    .expect("spawning processor thread")
            })
            .collect()
    }

    fn run(&self) {
        tracing::info!("Payment processor started");

        let client = match blocking_client() {
            Ok(client) => client,
            Err(error) => {
                tracing::error!(%error, "Payment processor cannot build http client");
                return;
            }
        };

        while let Some(payment) = self.queue.dequeue(&self.shutdown) {
            self.process_payment(&client, &payment);
        }

        tracing::info!("Payment processor stopped");
    }

    fn process_payment(&self, client: &reqwest::blocking::Client, payment: &PendingPayment) {
        let first = self.chooser.current();
        if self.try_submit(client, first, payment) {
            return;
        }

        // One retry on the gateway the failure flipped us to.
        let second = first.other();
        if self.try_submit(client, second, payment) {
            return;
        }

        tracing::warn!(
            correlation_id = %String::from_utf8_lossy(&payment.correlation_id),
            amount = payment.amount,
            "Payment dropped, both gateways failed"
        );
    }

    /// One submit attempt. On success persists the payment under the
    /// attempt's own timestamp; on failure flips the shared gateway choice.
    fn try_submit(
        &self,
        client: &reqwest::blocking::Client,
        gateway: Gateway,
        payment: &PendingPayment,
    ) -> bool {
        let requested_at = now_millis();

        match self
            .upstreams
            .submit_payment(client, gateway, payment, requested_at)
        {
            Ok(()) => {
                if let Err(error) = self.store.post_payment(
                    gateway,
                    payment.amount,
                    &payment.correlation_id,
                    requested_at,
                ) {
                    if error.is_map_full() {
                        tracing::warn!("Payment not recorded, database map is full");
                    } else {
                        tracing::error!(%error, "Payment processing error");
                    }
                }
                true
            }
            Err(error) => {
                self.chooser.switch_to(gateway.other());
                tracing::debug!(
                    gateway = gateway.name(),
                    %error,
                    "Payment submit failed, flipping gateway"
                );
                false
            }
        }
    }
}
