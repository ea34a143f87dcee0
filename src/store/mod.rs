//! Single in-memory keyed store partitioned by `(entity_type, tenant,
//! primary_key)` (C5).
//!
//! A single arena-like store enables atomic multi-entity-type batch
//! application: one lock domain, one rollback surface. Per-type capacity
//! is either configured explicitly or auto-distributed from a
//! total-records budget.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::config::StoreConfig;
use crate::registry::EntityTypeRegistry;
use crate::wal::codec::Value;

/// One stored record: the field map captured from the entry that last
/// wrote it.
pub type StoreRecord = Vec<(String, Value)>;

/// Errors raised by the unified entity store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The entity type's capacity quota is exhausted.
    #[error("capacity exceeded for entity type {entity_type} (limit {limit})")]
    CapacityExceeded {
        /// The entity type whose quota was reached.
        entity_type: String,
        /// The configured limit for that type.
        limit: usize,
    },
    /// The entity type has no registered capacity partition and none could
    /// be auto-distributed (e.g. the registry is empty).
    #[error("unknown entity type {0}")]
    UnknownEntityType(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    tenant: String,
    primary_key: String,
}

struct Partition {
    capacity: usize,
    records: HashMap<Key, StoreRecord>,
}

/// Single keyed store for every entity type the engine manages.
pub struct UnifiedEntityStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl UnifiedEntityStore {
    /// Builds a store with per-type capacities drawn from `config`,
    /// auto-distributing `config.max_total_records` across every entity
    /// type in `registry` that has no explicit entry in
    /// `config.per_type_capacity`.
    pub fn new(config: &StoreConfig, registry: &EntityTypeRegistry) -> Self {
        let mut partitions = HashMap::new();

        let explicit: usize = config.per_type_capacity.values().sum();
        let unconfigured_count = registry
            .iter()
            .filter(|d| !config.per_type_capacity.contains_key(&d.id))
            .count();
        let remaining = config.max_total_records.saturating_sub(explicit);
        let auto_share = if unconfigured_count > 0 {
            (remaining / unconfigured_count).max(1)
        } else {
            0
        };

        for descriptor in registry.iter() {
            let capacity = config
                .per_type_capacity
                .get(&descriptor.id)
                .copied()
                .unwrap_or(auto_share);
            partitions.insert(
                descriptor.id.clone(),
                Partition {
                    capacity,
                    records: HashMap::new(),
                },
            );
        }

        UnifiedEntityStore {
            partitions: RwLock::new(partitions),
        }
    }

    /// Inserts or replaces `record` by primary key.
    pub fn put(
        &self,
        entity_type: &str,
        tenant: &str,
        primary_key: &str,
        record: StoreRecord,
    ) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write().unwrap_or_else(|p| p.into_inner());
        let partition = partitions
            .get_mut(entity_type)
            .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))?;

        let key = Key {
            tenant: tenant.to_string(),
            primary_key: primary_key.to_string(),
        };

        if !partition.records.contains_key(&key) && partition.records.len() >= partition.capacity
        {
            return Err(StoreError::CapacityExceeded {
                entity_type: entity_type.to_string(),
                limit: partition.capacity,
            });
        }

        partition.records.insert(key, record);
        Ok(())
    }

    /// Looks up a record by its composite key.
    pub fn get(&self, entity_type: &str, tenant: &str, primary_key: &str) -> Option<StoreRecord> {
        let partitions = self.partitions.read().unwrap_or_else(|p| p.into_inner());
        let partition = partitions.get(entity_type)?;
        let key = Key {
            tenant: tenant.to_string(),
            primary_key: primary_key.to_string(),
        };
        partition.records.get(&key).cloned()
    }

    /// Removes and returns a record by its composite key, if present.
    pub fn remove(
        &self,
        entity_type: &str,
        tenant: &str,
        primary_key: &str,
    ) -> Option<StoreRecord> {
        let mut partitions = self.partitions.write().unwrap_or_else(|p| p.into_inner());
        let partition = partitions.get_mut(entity_type)?;
        let key = Key {
            tenant: tenant.to_string(),
            primary_key: primary_key.to_string(),
        };
        partition.records.remove(&key)
    }

    /// Returns whether a record exists for the composite key.
    pub fn contains(&self, entity_type: &str, tenant: &str, primary_key: &str) -> bool {
        let partitions = self.partitions.read().unwrap_or_else(|p| p.into_inner());
        partitions.get(entity_type).is_some_and(|p| {
            p.records.contains_key(&Key {
                tenant: tenant.to_string(),
                primary_key: primary_key.to_string(),
            })
        })
    }

    /// Snapshot of every record currently stored for `(entity_type,
    /// tenant)`. Finite and taken at call time; not guaranteed restartable
    /// across concurrent mutation.
    pub fn scan(&self, entity_type: &str, tenant: &str) -> Vec<(String, StoreRecord)> {
        let partitions = self.partitions.read().unwrap_or_else(|p| p.into_inner());
        match partitions.get(entity_type) {
            Some(partition) => partition
                .records
                .iter()
                .filter(|(k, _)| k.tenant == tenant)
                .map(|(k, v)| (k.primary_key.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of records currently stored for `entity_type`, across all
    /// tenants.
    pub fn size(&self, entity_type: &str) -> usize {
        let partitions = self.partitions.read().unwrap_or_else(|p| p.into_inner());
        partitions.get(entity_type).map_or(0, |p| p.records.len())
    }

    /// Total record count across every entity type.
    pub fn total_size(&self) -> usize {
        let partitions = self.partitions.read().unwrap_or_else(|p| p.into_inner());
        partitions.values().map(|p| p.records.len()).sum()
    }
}
