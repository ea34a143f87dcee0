//! End-to-end scenarios exercising the full commit/replay path through
//! the public `CacheEngine` API.

use std::fs;

use batchwal::config::{CacheConfig, FlushMode, RollCycle, SkipStrategy};
use batchwal::engine::CacheEngine;
use batchwal::error::FailureKind;
use batchwal::executor::InMemorySqlExecutor;
use batchwal::registry::{EntityTypeDescriptor, EntityTypeRegistry};
use batchwal::wal::codec::{Entry, Op, Value};
use tempfile::TempDir;

fn registry() -> EntityTypeRegistry {
    let mut r = EntityTypeRegistry::new();
    r.register(EntityTypeDescriptor::new("customer", "id"));
    r.register(EntityTypeDescriptor::new("order", "id"));
    r
}

fn open(dir: &std::path::Path, skip_strategy: SkipStrategy) -> CacheEngine {
    let registry = registry();
    let mut config = CacheConfig::with_dir(dir);
    config.corruption.skip_strategy = skip_strategy;
    config.wal.roll_cycle = RollCycle::Daily;
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    CacheEngine::open(config, executor, registry).unwrap()
}

#[test]
fn single_entry_insert_is_visible_after_commit() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), SkipStrategy::Aggressive);

    let result = engine.submit_batch(vec![Entry {
        tenant: "acme".to_string(),
        table: "customer".to_string(),
        op: Op::Insert,
        data: vec![
            ("id".to_string(), Value::Int64(1)),
            ("name".to_string(), Value::Str("Alice".to_string())),
        ],
    }]);

    assert!(result.success);
    assert_eq!(result.entries_processed, 1);
    let record = engine.get("customer", "acme", "1").unwrap();
    assert_eq!(
        record.iter().find(|(k, _)| k == "name").unwrap().1,
        Value::Str("Alice".to_string())
    );
}

#[test]
fn multi_entity_type_batch_commits_atomically() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), SkipStrategy::Aggressive);

    let result = engine.submit_batch(vec![
        Entry {
            tenant: "acme".to_string(),
            table: "customer".to_string(),
            op: Op::Insert,
            data: vec![("id".to_string(), Value::Int64(1))],
        },
        Entry {
            tenant: "acme".to_string(),
            table: "order".to_string(),
            op: Op::Insert,
            data: vec![
                ("id".to_string(), Value::Int64(100)),
                ("customer_id".to_string(), Value::Int64(1)),
            ],
        },
    ]);

    assert!(result.success);
    assert!(engine.get("customer", "acme", "1").is_some());
    assert!(engine.get("order", "acme", "100").is_some());
}

#[test]
fn duplicate_insert_fails_db_constraint_and_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), SkipStrategy::Aggressive);

    let entry = Entry {
        tenant: "acme".to_string(),
        table: "customer".to_string(),
        op: Op::Insert,
        data: vec![("id".to_string(), Value::Int64(9))],
    };
    let first = engine.submit_batch(vec![entry.clone()]);
    assert!(first.success);

    let second = engine.submit_batch(vec![entry]);
    assert!(!second.success);
    assert_eq!(second.error_kind, Some(FailureKind::DbConstraint));
    assert!(engine.get("customer", "acme", "9").is_some());
}

#[test]
fn empty_batch_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), SkipStrategy::Aggressive);

    let result = engine.submit_batch(vec![]);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(FailureKind::ValidationError));
}

#[test]
fn restart_replays_wal_and_restores_store_state() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = open(tmp.path(), SkipStrategy::Aggressive);
        for i in 0..5i64 {
            let result = engine.submit_batch(vec![Entry {
                tenant: "acme".to_string(),
                table: "customer".to_string(),
                op: Op::Insert,
                data: vec![("id".to_string(), Value::Int64(i))],
            }]);
            assert!(result.success);
        }
        engine.shutdown(5_000).unwrap();
    }

    // Reopen with a fresh executor (no persisted checkpoint): replay must
    // fully repopulate the Store from the WAL.
    let registry = registry();
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    let engine =
        CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();

    for i in 0..5i64 {
        assert!(engine.get("customer", "acme", &i.to_string()).is_some());
    }
    assert_eq!(engine.statistics().store_size, 5);
}

#[test]
fn corrupt_wal_tail_is_skipped_and_surfaced_as_data_loss() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = open(tmp.path(), SkipStrategy::Aggressive);
        for i in 0..3i64 {
            let result = engine.submit_batch(vec![Entry {
                tenant: "acme".to_string(),
                table: "customer".to_string(),
                op: Op::Insert,
                data: vec![("id".to_string(), Value::Int64(i))],
            }]);
            assert!(result.success);
        }
        engine.shutdown(5_000).unwrap();
    }

    // Flip the last byte of the active segment file, corrupting the final
    // record's checksum.
    let mut segment_path = None;
    for entry in fs::read_dir(tmp.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) == Some("log") {
            segment_path = Some(path);
        }
    }
    let path = segment_path.expect("a segment file exists");
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let registry = registry();
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    let engine =
        CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();

    // The first two good records replay; the corrupt tail is skipped.
    assert!(engine.get("customer", "acme", "0").is_some());
    assert!(engine.get("customer", "acme", "1").is_some());
}

#[test]
fn conservative_skip_strategy_stops_at_first_corruption() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = open(tmp.path(), SkipStrategy::Conservative);
        let result = engine.submit_batch(vec![Entry {
            tenant: "acme".to_string(),
            table: "customer".to_string(),
            op: Op::Insert,
            data: vec![("id".to_string(), Value::Int64(1))],
        }]);
        assert!(result.success);
        engine.shutdown(5_000).unwrap();
    }

    let mut segment_path = None;
    for entry in fs::read_dir(tmp.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) == Some("log") {
            segment_path = Some(path);
        }
    }
    let path = segment_path.expect("a segment file exists");
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let mut config = CacheConfig::with_dir(tmp.path());
    config.corruption.skip_strategy = SkipStrategy::Conservative;
    let registry = registry();
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    let engine = CacheEngine::open(config, executor, registry).unwrap();

    // The sole record was corrupted; Conservative gives up without an
    // emergency jump, so the Store stays empty.
    assert_eq!(engine.statistics().store_size, 0);
}

#[test]
fn submit_while_not_ready_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), SkipStrategy::Aggressive);
    engine.shutdown(1_000).unwrap();

    let result = engine.submit_batch(vec![Entry {
        tenant: "acme".to_string(),
        table: "customer".to_string(),
        op: Op::Insert,
        data: vec![("id".to_string(), Value::Int64(1))],
    }]);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(FailureKind::NotReady));
}

#[test]
fn delete_then_replay_leaves_key_absent() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = open(tmp.path(), SkipStrategy::Aggressive);
        let insert = engine.submit_batch(vec![Entry {
            tenant: "acme".to_string(),
            table: "customer".to_string(),
            op: Op::Insert,
            data: vec![("id".to_string(), Value::Int64(1))],
        }]);
        assert!(insert.success);
        let delete = engine.submit_batch(vec![Entry {
            tenant: "acme".to_string(),
            table: "customer".to_string(),
            op: Op::Delete,
            data: vec![("id".to_string(), Value::Int64(1))],
        }]);
        assert!(delete.success);
        assert!(engine.get("customer", "acme", "1").is_none());
        engine.shutdown(5_000).unwrap();
    }

    let registry = registry();
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    let engine =
        CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();
    assert!(engine.get("customer", "acme", "1").is_none());
}

#[test]
fn segment_rotation_preserves_read_order_across_boundaries() {
    let tmp = TempDir::new().unwrap();
    let registry = registry();
    let mut config = CacheConfig::with_dir(tmp.path());
    // Force a roll on nearly every append by using the shortest cycle.
    config.wal.roll_cycle = RollCycle::Minutely;
    config.wal.flush_mode = FlushMode::PerBatch;
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    let engine = CacheEngine::open(config, executor, registry.clone()).unwrap();

    for i in 0..20i64 {
        let result = engine.submit_batch(vec![Entry {
            tenant: "acme".to_string(),
            table: "customer".to_string(),
            op: Op::Insert,
            data: vec![("id".to_string(), Value::Int64(i))],
        }]);
        assert!(result.success);
    }
    engine.shutdown(5_000).unwrap();

    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    let engine = CacheEngine::open(CacheConfig::with_dir(tmp.path()), executor, registry).unwrap();
    for i in 0..20i64 {
        assert!(engine.get("customer", "acme", &i.to_string()).is_some());
    }
}
