//! Gateway selection shared across replicas.
//!
//! A tiny shared-memory region holds the currently chosen gateway as one
//! atomic byte behind a ready-once semaphore. Every replica reads it
//! lock-free before each submit and flips it eagerly on upstream failure;
//! the coordinator additionally runs a periodic health-poll loop as the
//! sanity signal.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::ipc::IpcError;
use crate::ipc::shm::SharedMemory;
use crate::ipc::sync::ShmSemaphore;
use crate::shutdown::ShutdownSignal;
use crate::types::Gateway;
use crate::upstream::{GatewayHealth, Upstreams, blocking_client};

const CHOOSER_SHM_NAME: &str = "/payrail-gateway-chooser";

/// Health-poll period of the coordinator loop.
pub const POLL_TIME: Duration = Duration::from_secs(5);

#[repr(C)]
struct ChooserShared {
    ready: ShmSemaphore,
    current_gateway: AtomicU8,
}

pub struct GatewayChooser {
    shm: SharedMemory,
}

impl GatewayChooser {
    /// Create the shared region. Coordinator only.
    pub fn create() -> Result<Self, IpcError> {
        let shm = SharedMemory::create(CHOOSER_SHM_NAME, std::mem::size_of::<ChooserShared>())
            .map_err(|source| IpcError::SharedMemory {
                name: CHOOSER_SHM_NAME,
                source,
            })?;

        let chooser = Self { shm };
        unsafe {
            let shared = chooser.shared_ptr();
            ShmSemaphore::init(&raw mut (*shared).ready)?;
            (*shared)
                .current_gateway
                .store(Gateway::Default as u8, Ordering::Relaxed);
        }

        tracing::info!("Gateway chooser region initialized");
        chooser.shared().ready.post();

        Ok(chooser)
    }

    /// Attach to the coordinator's region, waiting for readiness. The
    /// ready semaphore is re-posted so any number of peers pass.
    pub fn open() -> Result<Self, IpcError> {
        let shm = SharedMemory::open(CHOOSER_SHM_NAME).map_err(|source| IpcError::SharedMemory {
            name: CHOOSER_SHM_NAME,
            source,
        })?;

        let chooser = Self { shm };
        chooser.shared().ready.wait();
        chooser.shared().ready.post();
        tracing::info!("Gateway chooser region initialized by other process");

        Ok(chooser)
    }

    /// Current choice. Relaxed: a stale read is tolerable because the
    /// processor also reacts to failures directly.
    pub fn current(&self) -> Gateway {
        Gateway::from_u8(self.shared().current_gateway.load(Ordering::Relaxed))
    }

    pub fn switch_to(&self, gateway: Gateway) {
        self.shared()
            .current_gateway
            .store(gateway as u8, Ordering::Relaxed);
    }

    fn shared_ptr(&self) -> *mut ChooserShared {
        self.shm.as_ptr() as *mut ChooserShared
    }

    fn shared(&self) -> &ChooserShared {
        unsafe { &*self.shared_ptr() }
    }
}

/// One tick of the decision table. `None` stands for "no usable reading
/// yet"; the caller retains the last known reading across ticks.
fn choose(
    default: Option<&GatewayHealth>,
    fallback: Option<&GatewayHealth>,
    current: Gateway,
) -> Gateway {
    match (default, fallback) {
        (Some(default), Some(fallback)) => {
            if !default.failing && !fallback.failing {
                // Prefer the default unless it is markedly slower.
                if default.min_response_time > 100
                    && default.min_response_time > fallback.min_response_time * 2
                {
                    Gateway::Fallback
                } else {
                    Gateway::Default
                }
            } else if !default.failing {
                Gateway::Default
            } else if !fallback.failing {
                Gateway::Fallback
            } else {
                Gateway::Default
            }
        }
        (Some(default), None) => {
            if !default.failing {
                Gateway::Default
            } else {
                Gateway::Fallback
            }
        }
        (None, Some(fallback)) => {
            if !fallback.failing {
                // Keep whatever is in use rather than thrash on a blind spot.
                current
            } else {
                Gateway::Default
            }
        }
        (None, None) => Gateway::Default,
    }
}

/// Coordinator-only control loop: poll both upstreams, publish the choice.
pub fn run_chooser(chooser: &GatewayChooser, upstreams: &Upstreams, shutdown: &ShutdownSignal) {
    tracing::info!("Gateway chooser started");

    let client = match blocking_client() {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(%error, "Gateway chooser cannot build http client");
            return;
        }
    };

    let mut default_health: Option<GatewayHealth> = None;
    let mut fallback_health: Option<GatewayHealth> = None;

    while !shutdown.is_shutdown_requested() {
        if let Some(health) = upstreams.check_health(&client, Gateway::Default) {
            default_health = Some(health);
        }
        if let Some(health) = upstreams.check_health(&client, Gateway::Fallback) {
            fallback_health = Some(health);
        }

        let current = chooser.current();
        let choice = choose(default_health.as_ref(), fallback_health.as_ref(), current);
        if choice != current {
            chooser.switch_to(choice);
            tracing::info!(gateway = choice.name(), "Gateway switched");
        }

        if let Some(health) = &default_health {
            tracing::info!(
                failing = health.failing,
                min_response_time = health.min_response_time,
                "DEFAULT health"
            );
        }
        if let Some(health) = &fallback_health {
            tracing::info!(
                failing = health.failing,
                min_response_time = health.min_response_time,
                "FALLBACK health"
            );
        }
        tracing::debug!(gateway = chooser.current().name(), "Current gateway");

        sleep_observing_shutdown(POLL_TIME, shutdown);
    }

    tracing::info!("Gateway chooser stopped");
}

fn sleep_observing_shutdown(total: Duration, shutdown: &ShutdownSignal) {
    let slice = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < total && !shutdown.is_shutdown_requested() {
        std::thread::sleep(slice);
        slept += slice;
    }
}
