//! Explicit, typed configuration surface for the cache engine.
//!
//! Mirrors every option named in the external-interfaces contract. Loading
//! a [`CacheConfig`] from a file or environment is an adapter-layer concern
//! and is intentionally not implemented here — callers construct the
//! struct directly, same as `EngineConfig` in the teacher crate this one
//! descends from.

use std::collections::HashMap;
use std::path::PathBuf;

/// How often the write-ahead log rolls to a new segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollCycle {
    /// Roll every minute (reference granularity).
    Minutely,
    /// Roll every hour.
    Hourly,
    /// Roll every day.
    Daily,
}

impl RollCycle {
    /// Bucket width in seconds.
    pub fn cycle_secs(self) -> u64 {
        match self {
            RollCycle::Minutely => 60,
            RollCycle::Hourly => 3_600,
            RollCycle::Daily => 86_400,
        }
    }
}

/// When the producer forces an `fsync` of the active segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Fsync after every batch (strict durability).
    PerBatch,
    /// Fsync after every `n` batches.
    EveryN(u32),
    /// Fsync at most once per `t` milliseconds.
    TimeMs(u64),
}

/// Corruption-skip aggressiveness used by the WAL consumer and replay engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipStrategy {
    /// Run the full escalating jump sequence, including the emergency
    /// 1,000,000-record jump, to always make forward progress.
    Aggressive,
    /// Run the bounded jump sequence (1, 10, 100, 1,000, 10,000) but stop
    /// short of the emergency jump; surfaces non-progress instead.
    Conservative,
    /// Fail the read immediately on the first corrupt record.
    None,
}

/// WAL-related options.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding segment files. Required.
    pub dir: PathBuf,
    /// Segment roll granularity. Default [`RollCycle::Minutely`].
    pub roll_cycle: RollCycle,
    /// Number of most-recent sealed segments to retain, in addition to the
    /// active one. Default 2.
    pub retention_segments: u32,
    /// Fsync policy. Default [`FlushMode::PerBatch`].
    pub flush_mode: FlushMode,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            dir: PathBuf::from("./wal"),
            roll_cycle: RollCycle::Minutely,
            retention_segments: 2,
            flush_mode: FlushMode::PerBatch,
        }
    }
}

/// Unified entity store options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Total record budget across all entity types. Default 1,000,000.
    pub max_total_records: usize,
    /// Explicit per-entity-type capacity. Absent entries are
    /// auto-distributed from the remaining share of `max_total_records`.
    pub per_type_capacity: HashMap<String, usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_total_records: 1_000_000,
            per_type_capacity: HashMap::new(),
        }
    }
}

/// Corruption-handling options.
#[derive(Debug, Clone, Copy)]
pub struct CorruptionConfig {
    /// Fraction (0.0-1.0) of total processed records beyond which
    /// accumulated data loss is treated as an operator-visible alarm.
    /// Default 0.1.
    pub max_acceptable_loss_percent: f64,
    /// Skip-on-corruption aggressiveness. Default [`SkipStrategy::Aggressive`].
    pub skip_strategy: SkipStrategy,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        CorruptionConfig {
            max_acceptable_loss_percent: 0.1,
            skip_strategy: SkipStrategy::Aggressive,
        }
    }
}

/// Commit coordinator options.
#[derive(Debug, Clone, Copy)]
pub struct CommitConfig {
    /// Deadline, in milliseconds, for a single `submit_batch` call before
    /// it is failed with `Timeout`. Default 5,000.
    pub deadline_ms: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        CommitConfig { deadline_ms: 5_000 }
    }
}

/// Top-level configuration for a [`crate::engine::CacheEngine`] instance.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// WAL layer options.
    pub wal: WalConfig,
    /// Store layer options.
    pub store: StoreConfig,
    /// Corruption-handling options.
    pub corruption: CorruptionConfig,
    /// Commit coordinator options.
    pub commit: CommitConfig,
}

impl CacheConfig {
    /// Build a config rooted at `dir` with every other field at its default.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        CacheConfig {
            wal: WalConfig {
                dir: dir.into(),
                ..WalConfig::default()
            },
            ..CacheConfig::default()
        }
    }
}
