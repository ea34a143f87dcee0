//! Orchestrates WAL-append → DB-transaction → Store-apply with
//! all-or-nothing semantics (C7).

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::FailureKind;
use crate::executor::{DbError, SqlExecutor};
use crate::registry::EntityTypeRegistry;
use crate::store::UnifiedEntityStore;
use crate::wal::codec::{Batch, Entry};
use crate::wal::segment::{Offset, SegmentedLog, WalError};
use crate::wal::WalProducer;

/// Errors raised by the commit coordinator itself (distinct from the
/// subsystem errors it wraps, which surface via [`SubmitResult::error_kind`]).
#[derive(Debug, Error)]
pub enum CommitError {
    /// Error from the WAL append step.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    /// Error from the DB transaction steps.
    #[error("db error: {0}")]
    Db(#[from] DbError),
    /// Submission deadline expired before the DB transaction began.
    #[error("commit deadline exceeded")]
    Timeout,
    /// The submitted batch failed structural validation.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Outcome of a single `submit_batch` call.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    /// Whether every entry in the batch was durably applied.
    pub success: bool,
    /// The batch's transaction id (assigned if the caller omitted one).
    pub txn_id: String,
    /// The WAL offset the batch was written at, if the WAL append
    /// succeeded.
    pub offset: Option<Offset>,
    /// Number of entries applied to the DB and Store.
    pub entries_processed: usize,
    /// Coarse failure classification, present only when `success` is
    /// `false`.
    pub error_kind: Option<FailureKind>,
}

/// Atomic counters backing `statistics()`; shared with the replay engine
/// so restart-time activity is reflected too.
#[derive(Default)]
pub struct CoordinatorStats {
    pub batches_total: std::sync::atomic::AtomicU64,
    pub entries_total: std::sync::atomic::AtomicU64,
    pub failed_batches: std::sync::atomic::AtomicU64,
}

/// Orchestrates the three-phase commit protocol. Callers submit batches
/// serially through this type (or externally mutex-guarded): it is not
/// internally locked beyond what the WAL and Store already provide, since
/// the spec designates it the sole writer.
pub struct CommitCoordinator<'a> {
    log: &'a SegmentedLog,
    executor: &'a dyn SqlExecutor,
    store: &'a UnifiedEntityStore,
    registry: &'a EntityTypeRegistry,
    consumer_name: String,
    deadline: Duration,
    flush_every_batch: bool,
    stats: &'a CoordinatorStats,
}

impl<'a> CommitCoordinator<'a> {
    /// Builds a coordinator over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: &'a SegmentedLog,
        executor: &'a dyn SqlExecutor,
        store: &'a UnifiedEntityStore,
        registry: &'a EntityTypeRegistry,
        consumer_name: impl Into<String>,
        deadline_ms: u64,
        flush_every_batch: bool,
        stats: &'a CoordinatorStats,
    ) -> Self {
        CommitCoordinator {
            log,
            executor,
            store,
            registry,
            consumer_name: consumer_name.into(),
            deadline: Duration::from_millis(deadline_ms),
            flush_every_batch,
            stats,
        }
    }

    /// Runs the full commit protocol for `entries`, assigning `txn_id` if
    /// absent. Never panics on a collaborator failure; every failure mode
    /// is captured in the returned [`SubmitResult`].
    pub fn submit_batch(&self, entries: Vec<Entry>, txn_id: Option<String>) -> SubmitResult {
        let deadline_at = Instant::now() + self.deadline;
        let txn_id = txn_id.unwrap_or_else(|| generate_txn_id());

        if entries.is_empty() {
            warn!(txn_id = %txn_id, "rejecting batch with zero entries");
            return failure(txn_id, FailureKind::ValidationError);
        }

        let wall_time_ms = now_millis();
        let batch = Batch {
            txn_id: txn_id.clone(),
            wall_time_ms,
            entries,
        };

        self.stats
            .batches_total
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // Step 2: durable WAL append.
        let producer = WalProducer::new(self.log);
        let offset = match producer.append(&batch) {
            Ok(offset) => offset,
            Err(e) => {
                error!(txn_id = %txn_id, error = %e, "WAL append failed; DB and Store untouched");
                self.record_failure();
                let kind = if matches!(e, WalError::Full) {
                    FailureKind::WalFull
                } else {
                    FailureKind::WalError
                };
                return failure(txn_id, kind);
            }
        };
        if self.flush_every_batch {
            if let Err(e) = producer.flush() {
                warn!(txn_id = %txn_id, error = %e, "flush after append failed");
            }
        }

        if Instant::now() >= deadline_at {
            warn!(txn_id = %txn_id, %offset, "commit deadline exceeded before DB transaction began");
            self.record_failure();
            return failure_with_offset(txn_id, offset, FailureKind::Timeout);
        }

        // Steps 3-4: DB transaction, with a single retry-with-backoff on
        // transient failures.
        match self.apply_to_db(&batch, offset) {
            Ok(()) => {}
            Err(e) => {
                error!(txn_id = %txn_id, %offset, error = %e, "DB transaction failed; batch remains in WAL without a DB commit");
                self.record_failure();
                let kind = match e {
                    DbError::Constraint(_) => FailureKind::DbConstraint,
                    _ => FailureKind::DbError,
                };
                return failure_with_offset(txn_id, offset, kind);
            }
        }

        // Step 5: apply to Store in submission order.
        for entry in &batch.entries {
            let descriptor = match self.registry.get(&entry.table) {
                Some(d) => d,
                None => {
                    warn!(table = %entry.table, "no entity-type descriptor; skipping Store apply");
                    continue;
                }
            };
            let pk = entry
                .field(&descriptor.primary_key_field)
                .and_then(|v| v.as_i64().map(|i| i.to_string()).or_else(|| v.as_str().map(str::to_string)));
            let Some(pk) = pk else {
                warn!(table = %entry.table, "entry missing primary key; skipping Store apply");
                continue;
            };

            let result = match entry.op {
                crate::wal::codec::Op::Delete => {
                    self.store.remove(&entry.table, &entry.tenant, &pk);
                    Ok(())
                }
                _ => self
                    .store
                    .put(&entry.table, &entry.tenant, &pk, entry.data.clone()),
            };
            if let Err(e) = result {
                warn!(table = %entry.table, error = %e, "store apply failed for entry within already-committed batch");
            }
        }

        self.stats
            .entries_total
            .fetch_add(batch.entries.len() as u64, std::sync::atomic::Ordering::Relaxed);

        debug!(txn_id = %txn_id, %offset, entries = batch.entries.len(), "batch committed");

        SubmitResult {
            success: true,
            txn_id,
            offset: Some(offset),
            entries_processed: batch.entries.len(),
            error_kind: None,
        }
    }

    fn apply_to_db(&self, batch: &Batch, offset: Offset) -> Result<(), DbError> {
        match self.try_apply_to_db(batch, offset) {
            Ok(()) => Ok(()),
            Err(DbError::Transient(reason)) => {
                warn!(reason = %reason, "transient DB error; retrying once after backoff");
                let _ = crossbeam::channel::after(Duration::from_millis(50)).recv();
                self.try_apply_to_db(batch, offset)
            }
            Err(e) => Err(e),
        }
    }

    fn try_apply_to_db(&self, batch: &Batch, offset: Offset) -> Result<(), DbError> {
        let tx = self.executor.begin()?;
        for entry in &batch.entries {
            if let Err(e) = self
                .executor
                .apply(tx, &entry.tenant, &entry.table, entry.op, &entry.data)
            {
                let _ = self.executor.rollback(tx);
                return Err(e);
            }
        }
        if let Err(e) = self
            .executor
            .store_checkpoint(Some(tx), &self.consumer_name, offset)
        {
            let _ = self.executor.rollback(tx);
            return Err(e);
        }
        self.executor.commit(tx)
    }

    fn record_failure(&self) {
        self.stats
            .failed_batches
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

fn failure(txn_id: String, kind: FailureKind) -> SubmitResult {
    SubmitResult {
        success: false,
        txn_id,
        offset: None,
        entries_processed: 0,
        error_kind: Some(kind),
    }
}

fn failure_with_offset(txn_id: String, offset: Offset, kind: FailureKind) -> SubmitResult {
    SubmitResult {
        success: false,
        txn_id,
        offset: Some(offset),
        entries_processed: 0,
        error_kind: Some(kind),
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn generate_txn_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("txn-{}-{n}", now_millis())
}
