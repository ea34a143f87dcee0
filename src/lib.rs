//! # batchwal
//!
//! A write-through, crash-recoverable in-memory cache backed by a
//! segmented write-ahead log, serving atomic batch commits across
//! multiple entity types in front of a relational database.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       CacheEngine                         │
//! │                                                           │
//! │  submit_batch()                                           │
//! │       │                                                   │
//! │       ▼                                                   │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐ │
//! │  │ WAL Producer│──►│ SqlExecutor  │──►│ Unified Entity  │ │
//! │  │ (segmented  │   │ (DB tx)      │   │ Store           │ │
//! │  │  log)       │   └──────────────┘   └─────────────────┘ │
//! │  └─────────────┘                                          │
//! │                                                           │
//! │  open() replays the WAL through WalConsumer / ReplayEngine│
//! │  before the engine accepts submissions.                   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Top-level `CacheEngine`: lifecycle, submission, health, statistics |
//! | [`wal`] | Segmented, CRC-protected write-ahead log, batch codec, producer, consumer |
//! | [`store`] | Unified in-memory entity store keyed by `(entity_type, tenant, primary_key)` |
//! | [`executor`] | `SqlExecutor` abstraction over the backing relational database |
//! | [`coordinator`] | Three-phase commit protocol: WAL append, DB transaction, Store apply |
//! | [`replay`] | Startup recovery: replays the WAL into the Store from the last checkpoint |
//! | [`registry`] | Entity-type descriptors (primary key field, table name) |
//! | [`config`] | Cache, WAL, Store, corruption-policy, and commit configuration |
//! | [`error`] | Crate-wide error taxonomy and coarse failure classification |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every batch is durably appended to a
//!   segmented log before the database transaction begins.
//! - **Atomic multi-entity-type batches** — a batch spanning several
//!   tables commits or fails as a unit.
//! - **Crash recovery** — on restart, the WAL is replayed from the last
//!   durable checkpoint into the in-memory store, idempotently.
//! - **Escalating corruption-skip policy** — a corrupt tail segment is
//!   recovered from via a bounded jump sequence, with every skip recorded
//!   as an operator-visible data-loss event.
//! - **Block-level CRC32 integrity** — every WAL record is checksummed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batchwal::config::CacheConfig;
//! use batchwal::engine::CacheEngine;
//! use batchwal::executor::InMemorySqlExecutor;
//! use batchwal::registry::{EntityTypeDescriptor, EntityTypeRegistry};
//! use batchwal::wal::codec::{Entry, Op, Value};
//!
//! let mut registry = EntityTypeRegistry::new();
//! registry.register(EntityTypeDescriptor::new("customer", "id"));
//!
//! let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
//! let engine = CacheEngine::open(
//!     CacheConfig::with_dir("/tmp/batchwal-demo"),
//!     executor,
//!     registry,
//! )
//! .unwrap();
//!
//! let result = engine.submit_batch(vec![Entry {
//!     tenant: "acme".to_string(),
//!     table: "customer".to_string(),
//!     op: Op::Insert,
//!     data: vec![("id".to_string(), Value::Int64(1))],
//! }]);
//! assert!(result.success);
//!
//! assert!(engine.get("customer", "acme", "1").is_some());
//! engine.shutdown(5_000).unwrap();
//! ```

#![allow(dead_code)]

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod replay;
pub mod store;
pub mod wal;

pub use error::{EngineError, FailureKind};
