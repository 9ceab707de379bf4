//! payrail - High-throughput payment intake
//!
//! A fixed set of replica processes on one host accepts payment
//! submissions, forwards them to one of two upstream processors and
//! answers range-summary queries, cooperating through shared memory.
//!
//! # Modules
//!
//! - [`types`] - Payment-domain types (gateway, correlation id, summaries)
//! - [`config`] - Environment-variable configuration
//! - [`logging`] - Tracing subscriber setup
//! - [`shutdown`] - Signal-driven shutdown flag
//! - [`ipc`] - Shared-memory request/response fabric
//! - [`store`] - LMDB-backed payment persistence
//! - [`pending`] - Pending-payments work queue
//! - [`upstream`] - Upstream processor HTTP client
//! - [`chooser`] - Shared gateway choice + coordinator health loop
//! - [`processor`] - Queue-draining payment submitter
//! - [`worker`] - Replica-side IPC slot handlers

pub mod chooser;
pub mod config;
pub mod ipc;
pub mod logging;
pub mod pending;
pub mod processor;
pub mod shutdown;
pub mod store;
pub mod time;
pub mod types;
pub mod upstream;
pub mod worker;

// Convenient re-exports at crate root
pub use chooser::GatewayChooser;
pub use config::Config;
pub use pending::PendingPaymentsQueue;
pub use processor::PaymentProcessor;
pub use shutdown::ShutdownSignal;
pub use store::PaymentStore;
pub use types::{CorrelationId, DateTimeMillis, Gateway, PendingPayment};
