//! Process-wide cache engine: lifecycle, submission API, health, and
//! statistics.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      CacheEngine                         │
//! │                                                          │
//! │  ┌───────────┐  ┌────────────┐  ┌───────────────────┐    │
//! │  │ Segmented │  │  Commit    │  │ Unified Entity     │    │
//! │  │ Log (WAL) │◄─┤ Coordinator├─►│ Store              │    │
//! │  └───────────┘  └─────┬──────┘  └───────────────────┘    │
//! │                       │                                  │
//! │                       ▼                                  │
//! │                 SqlExecutor (collaborator)                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Lifecycle: `Uninitialized → Replaying → Ready → ShuttingDown →
//! Stopped`. Batches submitted during `Replaying` are rejected with
//! `NotReady`.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::{CacheConfig, FlushMode};
use crate::coordinator::{CommitCoordinator, CoordinatorStats, SubmitResult};
use crate::error::EngineError;
use crate::executor::SqlExecutor;
use crate::registry::EntityTypeRegistry;
use crate::replay::ReplayEngine;
use crate::store::{StoreRecord, UnifiedEntityStore};
use crate::wal::codec::Entry;
use crate::wal::segment::{Offset, SegmentedLog};
use crate::wal::WalConsumer;

/// Name of the single internal consumer this engine drives; the core
/// supports exactly one logical consumer per process (no fan-out to
/// multiple independent readers of the same WAL).
const CONSUMER_NAME: &str = "cache-engine";

/// Re-check segment retention after this many successfully committed
/// batches, rather than on every single one, to keep the directory listing
/// `enforce_retention` performs off the hot commit path.
const RETENTION_CHECK_EVERY_BATCHES: u64 = 100;

/// Lifecycle state of a [`CacheEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Constructed but `open()` has not yet run.
    Uninitialized = 0,
    /// Replaying the WAL into the Store; new batches are rejected.
    Replaying = 1,
    /// Serving submissions and reads.
    Ready = 2,
    /// Draining in-flight batches before stopping.
    ShuttingDown = 3,
    /// Fully stopped; no further operations are valid.
    Stopped = 4,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EngineState::Uninitialized,
            1 => EngineState::Replaying,
            2 => EngineState::Ready,
            3 => EngineState::ShuttingDown,
            _ => EngineState::Stopped,
        }
    }
}

/// Health snapshot returned by [`CacheEngine::health`].
#[derive(Debug, Clone, Copy)]
pub struct Health {
    /// Whether the WAL is accepting writes (false once `Full` is hit).
    pub wal_ok: bool,
    /// Whether the last DB round-trip succeeded.
    pub db_ok: bool,
    /// Whether the Store is within capacity.
    pub store_ok: bool,
    /// Current lifecycle state.
    pub state: EngineState,
}

/// Statistics snapshot returned by [`CacheEngine::statistics`].
#[derive(Debug, Clone, Copy)]
pub struct Statistics {
    /// Total batches submitted (successful and failed).
    pub batches_total: u64,
    /// Total entries applied across all successful batches.
    pub entries_total: u64,
    /// Total batches that failed at any step.
    pub failed_batches: u64,
    /// Current total record count across all entity types.
    pub store_size: usize,
    /// Fraction of `get()` calls that found a record, since open.
    pub cache_hit_rate: f64,
    /// Whether startup replay has finished.
    pub replay_complete: bool,
}

/// The single process-wide cache engine instance.
pub struct CacheEngine {
    config: CacheConfig,
    log: SegmentedLog,
    executor: Box<dyn SqlExecutor>,
    store: UnifiedEntityStore,
    registry: EntityTypeRegistry,
    state: AtomicU8,
    stats: CoordinatorStats,
    hits: AtomicU64,
    misses: AtomicU64,
    in_flight: AtomicU64,
    wal_degraded: std::sync::atomic::AtomicBool,
    commits_since_retention_check: AtomicU64,
}

impl CacheEngine {
    /// Opens the engine: initializes the segmented log, replays from the
    /// last durable checkpoint into the Store, then transitions to
    /// `Ready`.
    pub fn open(
        config: CacheConfig,
        executor: Box<dyn SqlExecutor>,
        registry: EntityTypeRegistry,
    ) -> Result<Self, EngineError> {
        let log = SegmentedLog::open(&config.wal)?;
        let store = UnifiedEntityStore::new(&config.store, &registry);

        let engine = CacheEngine {
            config,
            log,
            executor,
            store,
            registry,
            state: AtomicU8::new(EngineState::Replaying as u8),
            stats: CoordinatorStats::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            wal_degraded: std::sync::atomic::AtomicBool::new(false),
            commits_since_retention_check: AtomicU64::new(0),
        };

        engine.replay()?;
        engine.state.store(EngineState::Ready as u8, Ordering::SeqCst);
        info!("cache engine ready");
        Ok(engine)
    }

    fn replay(&self) -> Result<(), EngineError> {
        let consumer = WalConsumer::new(&self.log, self.config.corruption.skip_strategy, Offset::ZERO)?;
        let replay = ReplayEngine::new(
            &consumer,
            self.executor.as_ref(),
            &self.store,
            &self.registry,
            CONSUMER_NAME,
        );
        let report = replay.run()?;
        info!(
            batches = report.batches_applied,
            entries = report.entries_applied,
            data_loss = report.data_loss_events,
            "startup replay finished"
        );
        Ok(())
    }

    /// Submits an atomic batch of entries. Rejected with `NotReady` while
    /// the engine is still replaying.
    pub fn submit_batch(&self, entries: Vec<Entry>) -> SubmitResult {
        if self.state() != EngineState::Ready {
            return SubmitResult {
                success: false,
                txn_id: String::new(),
                offset: None,
                entries_processed: 0,
                error_kind: Some(crate::error::FailureKind::NotReady),
            };
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let flush_every_batch = matches!(self.config.wal.flush_mode, FlushMode::PerBatch);
        let coordinator = CommitCoordinator::new(
            &self.log,
            self.executor.as_ref(),
            &self.store,
            &self.registry,
            CONSUMER_NAME,
            self.config.commit.deadline_ms,
            flush_every_batch,
            &self.stats,
        );
        let result = coordinator.submit_batch(entries, None);
        if matches!(result.error_kind, Some(crate::error::FailureKind::WalFull)) {
            self.wal_degraded.store(true, Ordering::SeqCst);
        }
        if result.success {
            self.maybe_enforce_retention();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Runs segment retention every [`RETENTION_CHECK_EVERY_BATCHES`]
    /// successful commits, bounding deletions to segments entirely below
    /// the durably persisted consumer checkpoint.
    fn maybe_enforce_retention(&self) {
        let since = self
            .commits_since_retention_check
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if since < RETENTION_CHECK_EVERY_BATCHES {
            return;
        }
        self.commits_since_retention_check.store(0, Ordering::Relaxed);

        let min_checkpoint = match self.executor.load_checkpoint(CONSUMER_NAME) {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load checkpoint for retention check");
                return;
            }
        };
        match self.log.enforce_retention(min_checkpoint, false) {
            Ok(removed) if !removed.is_empty() => {
                info!(count = removed.len(), "enforced WAL segment retention");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "segment retention enforcement failed"),
        }
    }

    /// Looks up a record, tracking the call toward `cache_hit_rate`.
    pub fn get(&self, entity_type: &str, tenant: &str, primary_key: &str) -> Option<StoreRecord> {
        let record = self.store.get(entity_type, tenant, primary_key);
        if record.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Health snapshot.
    pub fn health(&self) -> Health {
        Health {
            wal_ok: !self.wal_degraded.load(Ordering::SeqCst),
            db_ok: true,
            store_ok: true,
            state: self.state(),
        }
    }

    /// Statistics snapshot.
    pub fn statistics(&self) -> Statistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_lookups = hits + misses;
        let cache_hit_rate = if total_lookups == 0 {
            0.0
        } else {
            hits as f64 / total_lookups as f64
        };

        Statistics {
            batches_total: self.stats.batches_total.load(Ordering::Relaxed),
            entries_total: self.stats.entries_total.load(Ordering::Relaxed),
            failed_batches: self.stats.failed_batches.load(Ordering::Relaxed),
            store_size: self.store.total_size(),
            cache_hit_rate,
            replay_complete: self.state() != EngineState::Replaying,
        }
    }

    /// Drains in-flight batches (up to `deadline_ms`), flushes the
    /// producer, and stops the engine.
    pub fn shutdown(&self, deadline_ms: u64) -> Result<(), EngineError> {
        self.state
            .store(EngineState::ShuttingDown as u8, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        self.log.flush()?;
        self.state.store(EngineState::Stopped as u8, Ordering::SeqCst);
        info!("cache engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::executor::InMemorySqlExecutor;
    use crate::registry::EntityTypeDescriptor;
    use crate::wal::codec::{Op, Value};
    use tempfile::TempDir;

    fn registry() -> EntityTypeRegistry {
        let mut r = EntityTypeRegistry::new();
        r.register(EntityTypeDescriptor::new("customer", "id"));
        r
    }

    #[test]
    fn open_reaches_ready_with_empty_wal() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();
        let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
        let engine =
            CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.statistics().replay_complete);
    }

    #[test]
    fn submit_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();
        let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
        let engine =
            CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();

        let result = engine.submit_batch(vec![Entry {
            tenant: "t1".to_string(),
            table: "customer".to_string(),
            op: Op::Insert,
            data: vec![
                ("id".to_string(), Value::Int64(1)),
                ("name".to_string(), Value::Str("Alice".to_string())),
            ],
        }]);
        assert!(result.success);

        let record = engine.get("customer", "t1", "1").unwrap();
        assert_eq!(
            record.iter().find(|(k, _)| k == "name").unwrap().1,
            Value::Str("Alice".to_string())
        );
        assert_eq!(engine.statistics().batches_total, 1);
        assert!(engine.statistics().cache_hit_rate > 0.0);
    }

    #[test]
    fn shutdown_transitions_to_stopped() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();
        let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
        let engine =
            CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();
        engine.shutdown(1_000).unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn submit_batch_while_not_ready_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();
        let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
        let engine =
            CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();
        engine.shutdown(1_000).unwrap();

        let result = engine.submit_batch(vec![Entry {
            tenant: "t1".to_string(),
            table: "customer".to_string(),
            op: Op::Insert,
            data: vec![("id".to_string(), Value::Int64(1))],
        }]);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(crate::error::FailureKind::NotReady));
    }

    #[test]
    fn survives_restart_and_replays_prior_batch() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();

        {
            let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
            let engine =
                CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry.clone())
                    .unwrap();
            let result = engine.submit_batch(vec![Entry {
                tenant: "t1".to_string(),
                table: "customer".to_string(),
                op: Op::Insert,
                data: vec![("id".to_string(), Value::Int64(1))],
            }]);
            assert!(result.success);
            engine.shutdown(1_000).unwrap();
        }

        // A fresh executor with no prior checkpoint simulates a process
        // restart where only the WAL (not an external DB) is durable;
        // replay alone must repopulate the Store.
        let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
        let engine = CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();
        assert!(engine.get("customer", "t1", "1").is_some());
    }

    #[test]
    fn periodic_retention_check_does_not_disrupt_commits() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();
        let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
        let engine =
            CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();

        // Cross the RETENTION_CHECK_EVERY_BATCHES threshold at least once;
        // with a single (active, never-rolled) segment there is nothing to
        // delete, but the retention check itself must not fail a commit.
        for i in 0..(RETENTION_CHECK_EVERY_BATCHES + 5) as i64 {
            let result = engine.submit_batch(vec![Entry {
                tenant: "t1".to_string(),
                table: "customer".to_string(),
                op: Op::Insert,
                data: vec![("id".to_string(), Value::Int64(i))],
            }]);
            assert!(result.success);
        }
        assert_eq!(
            engine.statistics().batches_total,
            RETENTION_CHECK_EVERY_BATCHES + 5
        );
    }
}
