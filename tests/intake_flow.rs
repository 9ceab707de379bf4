//! Intake flow exercised end to end without the network: a request enters
//! an IPC slot, a handler drains it into the pending queue, and the
//! processed payment lands in the store and shows up in range summaries.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payrail::config::Config;
use payrail::ipc::protocol::{IpcRequest, IpcSlot};
use payrail::pending::PendingPaymentsQueue;
use payrail::shutdown::ShutdownSignal;
use payrail::store::PaymentStore;
use payrail::types::{CORRELATION_ID_LEN, CorrelationId, Gateway, PendingPayment};

// Coordinator startup touches one global named semaphore; run the store
// openings one at a time.
static COORDINATOR_LOCK: Mutex<()> = Mutex::new(());

fn coordinator_config(database: PathBuf) -> Config {
    Config {
        instance_id: 0,
        workers: 2,
        io_workers: 1,
        handler_workers: 1,
        database,
        database_size: 10 * 1024 * 1024,
        listen_address: "127.0.0.1:0".to_string(),
        processor_default_address: "localhost:8001".to_string(),
        processor_fallback_address: "localhost:8002".to_string(),
    }
}

fn heap_slot() -> Arc<IpcSlot> {
    let slot: Arc<IpcSlot> = Arc::new(unsafe { std::mem::zeroed() });
    unsafe {
        IpcSlot::init(Arc::as_ptr(&slot) as *mut IpcSlot).unwrap();
    }
    slot
}

fn correlation_id(fill: u8) -> CorrelationId {
    [fill; CORRELATION_ID_LEN]
}

#[test]
fn accepted_payment_reaches_the_summary() {
    let _coordinator = COORDINATOR_LOCK.lock().unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let store = PaymentStore::open(&coordinator_config(dir.path().to_path_buf())).unwrap();
    let queue = PendingPaymentsQueue::new();
    let shutdown = ShutdownSignal::new();
    let slot = heap_slot();

    // Proxy side: fire-and-forget intake.
    slot.send_request(IpcRequest::PostPayment {
        amount: 10.5,
        correlation_id: correlation_id(b'a'),
    });

    // Worker side: drain the slot into the pending queue.
    assert!(slot.request_ready.wait_timeout(Duration::from_secs(1)));
    match slot.take_request() {
        IpcRequest::PostPayment {
            amount,
            correlation_id,
        } => queue.enqueue(
            PendingPayment {
                amount,
                correlation_id,
            },
            &shutdown,
        ),
        other => panic!("unexpected request: {other:?}"),
    }

    // Processor side: upstream accepted, persist under the submit instant.
    let payment = queue.dequeue(&shutdown).unwrap();
    store
        .post_payment(
            Gateway::Default,
            payment.amount,
            &payment.correlation_id,
            1_000,
        )
        .unwrap();

    let summary = store.payments_summary(None, None).unwrap();
    assert_eq!(summary.default.total_requests, 1);
    assert_eq!(summary.default.total_amount, 10.5);
    assert_eq!(summary.fallback.total_requests, 0);
}

#[test]
fn range_summary_selects_only_covered_instants() {
    let _coordinator = COORDINATOR_LOCK.lock().unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let store = PaymentStore::open(&coordinator_config(dir.path().to_path_buf())).unwrap();

    for (at, amount) in [(100, 1.25), (200, 2.5), (300, 5.0)] {
        store
            .post_payment(Gateway::Default, amount, &correlation_id(b'r'), at)
            .unwrap();
    }

    let summary = store.payments_summary(Some(150), Some(250)).unwrap();
    assert_eq!(summary.default.total_requests, 1);
    assert_eq!(summary.default.total_amount, 2.5);
}

#[test]
fn purge_clears_store_and_queue() {
    let _coordinator = COORDINATOR_LOCK.lock().unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let store = PaymentStore::open(&coordinator_config(dir.path().to_path_buf())).unwrap();
    let queue = PendingPaymentsQueue::new();
    let shutdown = ShutdownSignal::new();

    store
        .post_payment(Gateway::Fallback, 3.0, &correlation_id(b'p'), 500)
        .unwrap();
    queue.enqueue(
        PendingPayment {
            amount: 1.0,
            correlation_id: correlation_id(b'q'),
        },
        &shutdown,
    );

    store.purge().unwrap();
    queue.purge();

    let summary = store.payments_summary(None, None).unwrap();
    assert_eq!(summary.default.total_requests, 0);
    assert_eq!(summary.fallback.total_requests, 0);
    assert_eq!(summary.fallback.total_amount, 0.0);
    assert!(queue.is_empty());
}
