//! External collaborator interface: a SQL-backed transactional executor
//! (C6), plus an in-process reference implementation.
//!
//! The core depends only on the [`SqlExecutor`] trait; schema management,
//! SQL dialect, and connection pooling are adapter concerns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::registry::EntityTypeRegistry;
use crate::wal::codec::{Op, Value};
use crate::wal::consumer::DataLossEvent;
use crate::wal::segment::Offset;

/// Errors raised by a [`SqlExecutor`].
#[derive(Debug, Error)]
pub enum DbError {
    /// A transient fault (e.g. connection reset, deadlock victim) that is
    /// worth retrying once.
    #[error("transient db error: {0}")]
    Transient(String),
    /// A constraint violation (unique key, foreign key, check).
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// A non-retryable fault.
    #[error("fatal db error: {0}")]
    Fatal(String),
}

/// Opaque handle to an open transaction, returned by
/// [`SqlExecutor::begin`]. The concrete executor owns whatever state the
/// handle refers to; the core never inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub u64);

/// Abstract collaborator the core depends on for all durable-database
/// interaction: transactions, per-entry mutation application, and
/// consumer-checkpoint persistence.
pub trait SqlExecutor: Send + Sync {
    /// Opens a new transaction.
    fn begin(&self) -> Result<TxHandle, DbError>;

    /// Applies one entry's mutation within `tx`. Idempotent under
    /// `Op::Upsert`; raises [`DbError::Constraint`] on a constraint
    /// violation.
    fn apply(
        &self,
        tx: TxHandle,
        tenant: &str,
        table: &str,
        op: Op,
        data: &[(String, Value)],
    ) -> Result<(), DbError>;

    /// Commits `tx`.
    fn commit(&self, tx: TxHandle) -> Result<(), DbError>;

    /// Rolls back `tx`.
    fn rollback(&self, tx: TxHandle) -> Result<(), DbError>;

    /// Loads the last committed offset for `consumer_name`, or `None` if
    /// it has never checkpointed.
    fn load_checkpoint(&self, consumer_name: &str) -> Result<Option<Offset>, DbError>;

    /// Persists `offset` as the checkpoint for `consumer_name`. When `tx`
    /// is `Some`, the write happens inside that transaction (live commit
    /// path); when `None`, it is executed standalone (replay checkpoint
    /// advance).
    fn store_checkpoint(
        &self,
        tx: Option<TxHandle>,
        consumer_name: &str,
        offset: Offset,
    ) -> Result<(), DbError>;

    /// Records a [`DataLossEvent`] to the persistent `data_loss` log for
    /// operator visibility.
    fn record_data_loss(&self, event: &DataLossEvent) -> Result<(), DbError>;
}

#[derive(Default)]
struct TableData {
    // keyed by (tenant, primary_key) -> field map
    rows: HashMap<(String, String), Vec<(String, Value)>>,
}

enum PendingOp {
    Apply {
        tenant: String,
        table: String,
        op: Op,
        data: Vec<(String, Value)>,
    },
    Checkpoint { consumer_name: String, offset: Offset },
}

/// A minimal in-process [`SqlExecutor`] backed by plain `HashMap` tables.
/// Ships as a legitimate embedded-use reference backend (not test-only):
/// transactions buffer their pending operations and apply them atomically
/// at `commit`, giving the same all-or-nothing semantics a real RDBMS
/// transaction would.
pub struct InMemorySqlExecutor {
    registry: EntityTypeRegistry,
    tables: Mutex<HashMap<String, TableData>>,
    checkpoints: Mutex<HashMap<String, Offset>>,
    data_loss_log: Mutex<Vec<DataLossEvent>>,
    pending: Mutex<HashMap<u64, Vec<PendingOp>>>,
    next_tx: AtomicU64,
}

impl InMemorySqlExecutor {
    /// Builds an empty executor using `registry` for primary-key
    /// resolution.
    pub fn new(registry: EntityTypeRegistry) -> Self {
        InMemorySqlExecutor {
            registry,
            tables: Mutex::new(HashMap::new()),
            checkpoints: Mutex::new(HashMap::new()),
            data_loss_log: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
        }
    }

    /// Snapshot of every recorded data-loss event, newest last.
    pub fn data_loss_events(&self) -> Vec<DataLossEvent> {
        self.data_loss_log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn primary_key_of(&self, table: &str, data: &[(String, Value)]) -> Result<String, DbError> {
        let descriptor = self.registry.get(table).ok_or_else(|| {
            DbError::Fatal(format!("no entity-type descriptor registered for {table}"))
        })?;
        data.iter()
            .find(|(name, _)| name == &descriptor.primary_key_field)
            .and_then(|(_, v)| match v {
                Value::Int64(i) => Some(i.to_string()),
                Value::Int32(i) => Some(i.to_string()),
                Value::Str(s) => Some(s.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                DbError::Fatal(format!(
                    "entry for {table} missing primary key field {}",
                    descriptor.primary_key_field
                ))
            })
    }
}

impl SqlExecutor for InMemorySqlExecutor {
    fn begin(&self) -> Result<TxHandle, DbError> {
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, Vec::new());
        Ok(TxHandle(id))
    }

    fn apply(
        &self,
        tx: TxHandle,
        tenant: &str,
        table: &str,
        op: Op,
        data: &[(String, Value)],
    ) -> Result<(), DbError> {
        // Validate eagerly (constraint checks) so failures surface before
        // commit, matching a real executor's per-statement error reporting.
        let pk = self.primary_key_of(table, data)?;
        if op == Op::Insert {
            let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(existing) = tables.get(table) {
                if existing.rows.contains_key(&(tenant.to_string(), pk.clone())) {
                    return Err(DbError::Constraint(format!(
                        "duplicate primary key {pk} for {table}/{tenant}"
                    )));
                }
            }
        }

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let ops = pending
            .get_mut(&tx.0)
            .ok_or_else(|| DbError::Fatal("unknown transaction handle".to_string()))?;
        ops.push(PendingOp::Apply {
            tenant: tenant.to_string(),
            table: table.to_string(),
            op,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn commit(&self, tx: TxHandle) -> Result<(), DbError> {
        let ops = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&tx.0)
            .ok_or_else(|| DbError::Fatal("unknown transaction handle".to_string()))?;

        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        let mut checkpoints = self.checkpoints.lock().unwrap_or_else(|p| p.into_inner());

        for pending_op in ops {
            match pending_op {
                PendingOp::Apply {
                    tenant,
                    table,
                    op,
                    data,
                } => {
                    let pk = self.primary_key_of(&table, &data)?;
                    let table_data = tables.entry(table).or_default();
                    let key = (tenant, pk);
                    match op {
                        Op::Insert | Op::Update | Op::Upsert => {
                            table_data.rows.insert(key, data);
                        }
                        Op::Delete => {
                            table_data.rows.remove(&key);
                        }
                    }
                }
                PendingOp::Checkpoint {
                    consumer_name,
                    offset,
                } => {
                    checkpoints.insert(consumer_name, offset);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self, tx: TxHandle) -> Result<(), DbError> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&tx.0);
        Ok(())
    }

    fn load_checkpoint(&self, consumer_name: &str) -> Result<Option<Offset>, DbError> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(consumer_name)
            .copied())
    }

    fn store_checkpoint(
        &self,
        tx: Option<TxHandle>,
        consumer_name: &str,
        offset: Offset,
    ) -> Result<(), DbError> {
        match tx {
            Some(tx) => {
                let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
                let ops = pending
                    .get_mut(&tx.0)
                    .ok_or_else(|| DbError::Fatal("unknown transaction handle".to_string()))?;
                ops.push(PendingOp::Checkpoint {
                    consumer_name: consumer_name.to_string(),
                    offset,
                });
                Ok(())
            }
            None => {
                self.checkpoints
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(consumer_name.to_string(), offset);
                Ok(())
            }
        }
    }

    fn record_data_loss(&self, event: &DataLossEvent) -> Result<(), DbError> {
        self.data_loss_log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}
