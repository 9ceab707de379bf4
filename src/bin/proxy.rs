//! Front-end proxy: terminates HTTP and dispatches every request into the
//! shared-memory IPC fabric.
//!
//! Each I/O thread owns one IPC slot, claimed lazily on its first request.
//! Post-payment intake is fire-and-forget (write request, post, reply 200);
//! summary and purge block the owning thread on the response semaphore,
//! which is acceptable because both are rare next to intake traffic.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::timeout::TimeoutLayer;

use payrail::config::Config;
use payrail::ipc::IpcConnection;
use payrail::ipc::protocol::{IpcRequest, IpcSlot, TIME_UNBOUNDED_FROM, TIME_UNBOUNDED_TO};
use payrail::time::parse_rfc3339_millis;
use payrail::types::{CORRELATION_ID_LEN, CorrelationId};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

struct ProxyState {
    ipc: Arc<IpcConnection>,
}

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SLOT_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The slot owned by the current I/O thread, claimed on first use.
fn claim_slot(state: &ProxyState) -> Option<&IpcSlot> {
    let slots = state.ipc.slots();
    let index = SLOT_INDEX.with(|cell| match cell.get() {
        Some(index) => Some(index),
        None => {
            let index = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
            if index >= slots {
                // Configuration fault: more I/O threads than slots.
                tracing::error!(index, slots, "no IPC slot available for this thread");
                return None;
            }
            cell.set(Some(index));
            Some(index)
        }
    })?;
    Some(state.ipc.slot(index))
}

#[derive(Deserialize)]
struct PostPaymentBody {
    #[serde(rename = "correlationId")]
    correlation_id: String,
    amount: f64,
}

async fn post_payment(State(state): State<Arc<ProxyState>>, body: Bytes) -> StatusCode {
    let Ok(request) = serde_json::from_slice::<PostPaymentBody>(&body) else {
        return StatusCode::BAD_REQUEST;
    };

    if request.correlation_id.len() != CORRELATION_ID_LEN || !(request.amount > 0.0) {
        return StatusCode::BAD_REQUEST;
    }

    let mut correlation_id: CorrelationId = [0; CORRELATION_ID_LEN];
    correlation_id.copy_from_slice(request.correlation_id.as_bytes());

    let Some(slot) = claim_slot(&state) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    // Fire-and-forget: a worker picks the request up asynchronously.
    slot.send_request(IpcRequest::PostPayment {
        amount: request.amount,
        correlation_id,
    });

    StatusCode::OK
}

#[derive(Deserialize)]
struct SummaryParams {
    from: Option<String>,
    to: Option<String>,
}

async fn payments_summary(
    State(state): State<Arc<ProxyState>>,
    Query(params): Query<SummaryParams>,
) -> Response {
    let from = match &params.from {
        Some(value) => match parse_rfc3339_millis(value) {
            Some(millis) => millis,
            None => return StatusCode::BAD_REQUEST.into_response(),
        },
        None => TIME_UNBOUNDED_FROM,
    };
    let to = match &params.to {
        Some(value) => match parse_rfc3339_millis(value) {
            Some(millis) => millis,
            None => return StatusCode::BAD_REQUEST.into_response(),
        },
        None => TIME_UNBOUNDED_TO,
    };

    let Some(slot) = claim_slot(&state) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    slot.send_request(IpcRequest::PaymentsSummary { from, to });
    // Blocks the owning I/O thread until a worker answers.
    slot.response_ready.wait();
    let summary = slot.read_response();

    let body = format!(
        r#"{{"default":{{"totalRequests":{},"totalAmount":{:.2}}},"fallback":{{"totalRequests":{},"totalAmount":{:.2}}}}}"#,
        summary.default.total_requests,
        summary.default.total_amount,
        summary.fallback.total_requests,
        summary.fallback.total_amount,
    );

    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn purge_payments(State(state): State<Arc<ProxyState>>) -> StatusCode {
    let Some(slot) = claim_slot(&state) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    slot.send_request(IpcRequest::PurgePayments);
    slot.response_ready.wait();

    StatusCode::OK
}

fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/payments", post(post_payment))
        .route("/payments-summary", get(payments_summary))
        .route("/purge-payments", post(purge_payments))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .method_not_allowed_fallback(|| async { StatusCode::NOT_FOUND })
        .layer(TimeoutLayer::new(CONNECTION_TIMEOUT))
        .with_state(state)
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}

async fn serve(config: &Config, ipc: Arc<IpcConnection>) -> Result<()> {
    let state = Arc::new(ProxyState { ipc });
    let app = router(state);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    tracing::info!("Proxy stopped");
    Ok(())
}

fn main() -> Result<()> {
    let _log_guard = payrail::logging::init_logging("proxy");

    let config = Config::from_env().context("configuration")?;

    // Blocks until the coordinator has published the region.
    let ipc = Arc::new(IpcConnection::open().context("opening ipc region")?);
    ensure!(
        ipc.slots() >= config.io_workers as usize,
        "IPC region has {} slots but IO_WORKERS is {}",
        ipc.slots(),
        config.io_workers
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_workers as usize)
        .enable_all()
        .build()
        .context("building runtime")?;

    runtime.block_on(serve(&config, ipc))
}
