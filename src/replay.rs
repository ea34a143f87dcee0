//! On-startup recovery: replays the WAL into the Store from the last
//! durable checkpoint (C8).

use tracing::{info, warn};

use crate::executor::SqlExecutor;
use crate::registry::EntityTypeRegistry;
use crate::store::UnifiedEntityStore;
use crate::wal::codec::{Batch, Op};
use crate::wal::segment::Offset;
use crate::wal::WalConsumer;

/// Batches read per `read_next_batch` call during replay.
const REPLAY_BATCH_SIZE: usize = 256;
/// Persist the advancing checkpoint every this many processed batches,
/// rather than after every one, to bound replay overhead.
const CHECKPOINT_EVERY_BATCHES: u64 = 100;

/// Summary of a completed replay pass.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Number of batches applied to the Store.
    pub batches_applied: u64,
    /// Number of entries applied to the Store.
    pub entries_applied: u64,
    /// Number of data-loss events recorded.
    pub data_loss_events: u64,
    /// The offset replay advanced to.
    pub final_offset: Offset,
}

/// Drives [`WalConsumer`] → [`UnifiedEntityStore`] on startup.
pub struct ReplayEngine<'a> {
    consumer: &'a WalConsumer<'a>,
    executor: &'a dyn SqlExecutor,
    store: &'a UnifiedEntityStore,
    registry: &'a EntityTypeRegistry,
    consumer_name: String,
}

impl<'a> ReplayEngine<'a> {
    /// Builds a replay engine over the given collaborators.
    pub fn new(
        consumer: &'a WalConsumer<'a>,
        executor: &'a dyn SqlExecutor,
        store: &'a UnifiedEntityStore,
        registry: &'a EntityTypeRegistry,
        consumer_name: impl Into<String>,
    ) -> Self {
        ReplayEngine {
            consumer,
            executor,
            store,
            registry,
            consumer_name: consumer_name.into(),
        }
    }

    /// Runs replay to completion: seeks to the last durable checkpoint,
    /// applies every subsequent batch to the Store only, and persists the
    /// advancing checkpoint periodically.
    pub fn run(&self) -> Result<ReplayReport, crate::executor::DbError> {
        let last = self
            .executor
            .load_checkpoint(&self.consumer_name)?
            .unwrap_or(Offset::ZERO);
        self.consumer
            .seek_to(last)
            .map_err(|e| crate::executor::DbError::Fatal(e.to_string()))?;

        info!(%last, "replay starting");

        let mut report = ReplayReport {
            final_offset: last,
            ..Default::default()
        };
        let mut since_checkpoint = 0u64;

        loop {
            let (batches, events) = self.consumer.read_next_batch(REPLAY_BATCH_SIZE);
            if batches.is_empty() && events.is_empty() {
                break;
            }

            for event in &events {
                warn!(kind = ?event.kind, note = %event.note, "replay data-loss event");
                self.executor.record_data_loss(event)?;
                report.data_loss_events += 1;
            }

            for (offset, batch) in &batches {
                self.apply_batch_idempotent(batch);
                report.batches_applied += 1;
                report.entries_applied += batch.entries.len() as u64;
                report.final_offset = *offset;
                since_checkpoint += 1;

                if since_checkpoint >= CHECKPOINT_EVERY_BATCHES {
                    self.executor
                        .store_checkpoint(None, &self.consumer_name, *offset)?;
                    since_checkpoint = 0;
                }
            }
        }

        if since_checkpoint > 0 {
            self.executor
                .store_checkpoint(None, &self.consumer_name, report.final_offset)?;
        }

        info!(
            batches = report.batches_applied,
            entries = report.entries_applied,
            data_loss = report.data_loss_events,
            final_offset = %report.final_offset,
            "replay complete"
        );
        Ok(report)
    }

    fn apply_batch_idempotent(&self, batch: &Batch) {
        for entry in &batch.entries {
            let Some(descriptor) = self.registry.get(&entry.table) else {
                warn!(table = %entry.table, "no entity-type descriptor during replay; skipping entry");
                continue;
            };
            let Some(pk) = entry.field(&descriptor.primary_key_field).and_then(|v| {
                v.as_i64()
                    .map(|i| i.to_string())
                    .or_else(|| v.as_str().map(str::to_string))
            }) else {
                warn!(table = %entry.table, "entry missing primary key during replay; skipping");
                continue;
            };

            let exists = self.store.contains(&entry.table, &entry.tenant, &pk);
            match entry.op {
                Op::Insert | Op::Update | Op::Upsert => {
                    if entry.op == Op::Update && !exists {
                        warn!(table = %entry.table, tenant = %entry.tenant, pk, "UPDATE on absent key during replay; skipping");
                        continue;
                    }
                    if let Err(e) = self
                        .store
                        .put(&entry.table, &entry.tenant, &pk, entry.data.clone())
                    {
                        warn!(table = %entry.table, error = %e, "store apply failed during replay");
                    }
                }
                Op::Delete => {
                    if !exists {
                        continue;
                    }
                    self.store.remove(&entry.table, &entry.tenant, &pk);
                }
            }
        }
    }
}
