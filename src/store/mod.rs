//! Embedded payment storage on LMDB (via heed).
//!
//! One environment per host, shared by every replica; one duplicate-sorted
//! sub-database per gateway. The coordinator wipes and recreates the
//! environment on every start and gates peers behind a named semaphore
//! until the sub-databases exist.

pub mod repository;

use std::fs;
use std::path::Path;

use heed::{Env, EnvFlags, EnvOpenOptions};
use thiserror::Error;

use crate::config::Config;
use crate::ipc::sync::NamedSemaphore;
use crate::store::repository::PaymentRepository;
use crate::types::{CorrelationId, DateTimeMillis, Gateway, PaymentsSummary};

const COORDINATOR_SEMAPHORE_NAME: &str = "/payrail-coordinator";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database engine: {0}")]
    Engine(#[from] heed::Error),
    #[error("database files: {0}")]
    Io(#[from] std::io::Error),
    #[error("sub-database {0:?} missing; not initialized by the coordinator")]
    MissingDatabase(&'static str),
}

impl StoreError {
    /// Map-full is non-fatal: the payment is skipped, the process lives on.
    pub fn is_map_full(&self) -> bool {
        matches!(
            self,
            StoreError::Engine(heed::Error::Mdb(heed::MdbError::MapFull))
        )
    }
}

/// The shared LMDB environment plus one repository per gateway.
pub struct PaymentStore {
    env: Env,
    repositories: [PaymentRepository; Gateway::SIZE],
}

impl PaymentStore {
    /// Open the store with the coordinator readiness handshake.
    ///
    /// The coordinator removes `data.mdb`/`lock.mdb`, opens the environment
    /// with `CREATE`, then posts the named semaphore. Peers block on the
    /// semaphore (re-posting it so later peers pass too) and attach without
    /// creating anything.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        if config.coordinator() {
            let ready = NamedSemaphore::create(COORDINATOR_SEMAPHORE_NAME)?;
            wipe_database_dir(&config.database)?;

            let store = Self::open_env(&config.database, config.database_size, true)?;
            tracing::info!(path = %config.database.display(), "Database initialized");

            ready.post();
            Ok(store)
        } else {
            let ready = NamedSemaphore::open(COORDINATOR_SEMAPHORE_NAME)?;
            ready.wait();
            ready.post();

            let store = Self::open_env(&config.database, config.database_size, false)?;
            tracing::info!("Database initialized by other process");
            Ok(store)
        }
    }

    fn open_env(path: &Path, map_size: usize, create: bool) -> Result<Self, StoreError> {
        let mut options = EnvOpenOptions::new();
        options.map_size(map_size).max_dbs(Gateway::SIZE as u32);

        // Write-map with relaxed metadata/data sync; NO_TLS so any thread
        // may use a transaction.
        let env = unsafe {
            options.flags(
                EnvFlags::WRITE_MAP
                    | EnvFlags::NO_META_SYNC
                    | EnvFlags::NO_SYNC
                    | EnvFlags::NO_TLS
                    | EnvFlags::NO_MEM_INIT,
            );
            options.open(path)?
        };

        let repositories = [
            PaymentRepository::open(&env, Gateway::Default, create)?,
            PaymentRepository::open(&env, Gateway::Fallback, create)?,
        ];

        Ok(Self { env, repositories })
    }

    fn repository(&self, gateway: Gateway) -> &PaymentRepository {
        &self.repositories[gateway as usize]
    }

    /// Persist one payment under its submit timestamp. Called only after
    /// the upstream acknowledged the payment for `gateway`.
    pub fn post_payment(
        &self,
        gateway: Gateway,
        amount: f64,
        correlation_id: &CorrelationId,
        requested_at: DateTimeMillis,
    ) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        self.repository(gateway)
            .append(&mut wtxn, amount, correlation_id, requested_at)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Range summary over both gateways within a single read transaction.
    /// Bounds are inclusive; an absent bound is unbounded on that side.
    pub fn payments_summary(
        &self,
        from: Option<DateTimeMillis>,
        to: Option<DateTimeMillis>,
    ) -> Result<PaymentsSummary, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(PaymentsSummary {
            default: self.repository(Gateway::Default).summary(&rtxn, from, to)?,
            fallback: self.repository(Gateway::Fallback).summary(&rtxn, from, to)?,
        })
    }

    /// Empty both sub-databases in one write transaction.
    pub fn purge(&self) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        for repository in &self.repositories {
            repository.purge(&mut wtxn)?;
        }
        wtxn.commit()?;
        Ok(())
    }
}

/// Remove the previous run's environment files, creating the directory when
/// missing. History is wiped on every coordinator start by design.
fn wipe_database_dir(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        for file in ["data.mdb", "lock.mdb"] {
            let file_path = path.join(file);
            if file_path.exists() {
                fs::remove_file(file_path)?;
            }
        }
    } else {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &Path) -> PaymentStore {
        PaymentStore::open_env(dir, 10 * 1024 * 1024, true).unwrap()
    }

    fn correlation_id(fill: u8) -> CorrelationId {
        [fill; crate::types::CORRELATION_ID_LEN]
    }

    #[test]
    fn summary_counts_and_sums_per_gateway() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(dir.path());

        store
            .post_payment(Gateway::Default, 10.5, &correlation_id(b'a'), 100)
            .unwrap();
        store
            .post_payment(Gateway::Default, 2.25, &correlation_id(b'b'), 200)
            .unwrap();
        store
            .post_payment(Gateway::Fallback, 7.0, &correlation_id(b'c'), 150)
            .unwrap();

        let summary = store.payments_summary(None, None).unwrap();
        assert_eq!(summary.default.total_requests, 2);
        assert_eq!(summary.default.total_amount, 12.75);
        assert_eq!(summary.fallback.total_requests, 1);
        assert_eq!(summary.fallback.total_amount, 7.0);
    }

    #[test]
    fn summary_bounds_are_inclusive() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(dir.path());

        for (at, amount) in [(100, 1.0), (200, 2.0), (300, 4.0)] {
            store
                .post_payment(Gateway::Default, amount, &correlation_id(b'x'), at)
                .unwrap();
        }

        let summary = store.payments_summary(Some(150), Some(250)).unwrap();
        assert_eq!(summary.default.total_requests, 1);
        assert_eq!(summary.default.total_amount, 2.0);

        // Exact-match range returns the payment at that instant.
        let summary = store.payments_summary(Some(200), Some(200)).unwrap();
        assert_eq!(summary.default.total_requests, 1);

        // Bounds equal to stored keys are included on both sides.
        let summary = store.payments_summary(Some(100), Some(300)).unwrap();
        assert_eq!(summary.default.total_requests, 3);
        assert_eq!(summary.default.total_amount, 7.0);
    }

    #[test]
    fn duplicate_timestamps_are_all_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(dir.path());

        store
            .post_payment(Gateway::Default, 1.0, &correlation_id(b'a'), 500)
            .unwrap();
        store
            .post_payment(Gateway::Default, 2.0, &correlation_id(b'b'), 500)
            .unwrap();
        store
            .post_payment(Gateway::Default, 3.0, &correlation_id(b'c'), 500)
            .unwrap();

        let summary = store.payments_summary(Some(500), Some(500)).unwrap();
        assert_eq!(summary.default.total_requests, 3);
        assert_eq!(summary.default.total_amount, 6.0);
    }

    #[test]
    fn purge_is_idempotent_and_zeroes_both_gateways() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(dir.path());

        store
            .post_payment(Gateway::Default, 9.9, &correlation_id(b'a'), 1)
            .unwrap();
        store
            .post_payment(Gateway::Fallback, 1.1, &correlation_id(b'b'), 2)
            .unwrap();

        store.purge().unwrap();
        store.purge().unwrap();

        let summary = store.payments_summary(None, None).unwrap();
        assert_eq!(summary.default, Default::default());
        assert_eq!(summary.fallback, Default::default());
    }

    #[test]
    fn amount_survives_bitwise() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(dir.path());

        let amount = 19.90f64.next_up();
        store
            .post_payment(Gateway::Default, amount, &correlation_id(b'a'), 42)
            .unwrap();

        let summary = store.payments_summary(Some(42), Some(42)).unwrap();
        assert_eq!(summary.default.total_amount.to_bits(), amount.to_bits());
    }
}
