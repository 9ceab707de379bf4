//! Replica ("api") process: owns the store, the IPC worker threads, the
//! pending queue and the payment processors. The coordinator replica
//! additionally creates every shared artifact and runs the gateway chooser.

use std::sync::Arc;

use anyhow::{Context, Result};

use payrail::chooser::{self, GatewayChooser};
use payrail::config::Config;
use payrail::ipc::IpcConnection;
use payrail::pending::PendingPaymentsQueue;
use payrail::processor::PaymentProcessor;
use payrail::shutdown::ShutdownSignal;
use payrail::store::PaymentStore;
use payrail::upstream::Upstreams;
use payrail::worker::WorkerPool;

fn main() -> Result<()> {
    let _log_guard = payrail::logging::init_logging("payrail");

    let config = Config::from_env().context("configuration")?;
    tracing::info!(
        instance_id = config.instance_id,
        coordinator = config.coordinator(),
        workers = config.workers,
        handler_workers = config.handler_workers,
        "Replica starting"
    );

    let shutdown = Arc::new(ShutdownSignal::new());
    shutdown.install().context("installing signal handlers")?;

    // Shared artifacts, coordinator-created, in dependency order. Peers
    // block inside each open until the coordinator has published it.
    let store = Arc::new(PaymentStore::open(&config).context("opening payment store")?);

    let gateway_chooser = Arc::new(if config.coordinator() {
        GatewayChooser::create().context("creating gateway chooser region")?
    } else {
        GatewayChooser::open().context("opening gateway chooser region")?
    });

    let ipc = Arc::new(if config.coordinator() {
        IpcConnection::create(config.workers as usize).context("creating ipc region")?
    } else {
        IpcConnection::open().context("opening ipc region")?
    });

    let upstreams = Arc::new(Upstreams::resolve(&config).context("resolving upstreams")?);
    let queue = Arc::new(PendingPaymentsQueue::new());

    let mut threads = Vec::new();

    if config.coordinator() {
        let gateway_chooser = Arc::clone(&gateway_chooser);
        let upstreams = Arc::clone(&upstreams);
        let shutdown = Arc::clone(&shutdown);
        threads.push(
            std::thread::Builder::new()
                .name("gateway-chooser".to_string())
                .spawn(move || chooser::run_chooser(&gateway_chooser, &upstreams, &shutdown))
                .expect("spawning gateway chooser thread"),
        );
    }

    let processor = Arc::new(PaymentProcessor::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&gateway_chooser),
        Arc::clone(&upstreams),
        Arc::clone(&shutdown),
    ));
    threads.extend(processor.spawn(config.handler_workers));

    let workers = Arc::new(WorkerPool::new(
        Arc::clone(&ipc),
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&shutdown),
    ));
    threads.extend(workers.spawn());

    tracing::info!("Replica started");

    for thread in threads {
        if thread.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
