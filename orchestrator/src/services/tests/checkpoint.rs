//! Tests for the checkpoint store implementations

use chrono::Utc;
use shared::{CheckpointRecord, ProviderId, TripleKey, UsageStats};

use crate::services::checkpoint::{JsonlCheckpointStore, MemoryCheckpointStore};
use crate::traits::CheckpointStore;

fn triple(run_index: u32) -> TripleKey {
    TripleKey {
        model_id: "claude-sonnet".into(),
        provider: ProviderId::Anthropic,
        sequence_name: "noir".into(),
        run_index,
    }
}

fn record(run_index: u32, prompt_index: u32, response: &str) -> CheckpointRecord {
    CheckpointRecord {
        unit: triple(run_index).unit(prompt_index),
        response: response.to_string(),
        usage: UsageStats::default(),
        completed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_memory_store_basic_round_trip() {
    let store = MemoryCheckpointStore::new();
    assert!(!store.has(&triple(0).unit(0)).await.unwrap());

    store.put(record(0, 0, "r0")).await.unwrap();
    assert!(store.has(&triple(0).unit(0)).await.unwrap());
    assert_eq!(store.completed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_memory_store_orders_and_filters_by_triple() {
    let store = MemoryCheckpointStore::new();
    store.put(record(0, 2, "r2")).await.unwrap();
    store.put(record(0, 0, "r0")).await.unwrap();
    store.put(record(0, 1, "r1")).await.unwrap();
    store.put(record(1, 0, "other-run")).await.unwrap();

    let records = store.completed_records(&triple(0)).await.unwrap();
    let indices: Vec<u32> = records.iter().map(|r| r.unit.prompt_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(records[1].response, "r1");
}

#[tokio::test]
async fn test_duplicate_put_is_idempotent() {
    let store = MemoryCheckpointStore::new();
    store.put(record(0, 0, "first")).await.unwrap();
    store.put(record(0, 0, "second")).await.unwrap();

    assert_eq!(store.completed_count().await.unwrap(), 1);
    let records = store.completed_records(&triple(0)).await.unwrap();
    assert_eq!(records[0].response, "second");
}

#[tokio::test]
async fn test_jsonl_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints").join("run.jsonl");

    {
        let store = JsonlCheckpointStore::open(&path).await.unwrap();
        store.put(record(0, 0, "r0")).await.unwrap();
        store.put(record(0, 1, "r1")).await.unwrap();
    }

    // Fresh process: records must still be there, in order
    let store = JsonlCheckpointStore::open(&path).await.unwrap();
    assert_eq!(store.completed_count().await.unwrap(), 2);
    assert!(store.has(&triple(0).unit(1)).await.unwrap());
    let records = store.completed_records(&triple(0)).await.unwrap();
    assert_eq!(records[0].response, "r0");
    assert_eq!(records[1].response, "r1");
}

#[tokio::test]
async fn test_jsonl_store_keeps_latest_duplicate_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.jsonl");

    {
        let store = JsonlCheckpointStore::open(&path).await.unwrap();
        store.put(record(0, 0, "stale")).await.unwrap();
        store.put(record(0, 0, "fresh")).await.unwrap();
    }

    let store = JsonlCheckpointStore::open(&path).await.unwrap();
    assert_eq!(store.completed_count().await.unwrap(), 1);
    let records = store.completed_records(&triple(0)).await.unwrap();
    assert_eq!(records[0].response, "fresh");
}

#[tokio::test]
async fn test_jsonl_store_skips_torn_trailing_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.jsonl");

    {
        let store = JsonlCheckpointStore::open(&path).await.unwrap();
        store.put(record(0, 0, "r0")).await.unwrap();
    }
    // Simulate a crash mid-write
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        write!(file, "{{\"unit\":{{\"model_id\":\"claude").unwrap();
    }

    let store = JsonlCheckpointStore::open(&path).await.unwrap();
    assert_eq!(store.completed_count().await.unwrap(), 1);
    assert!(store.has(&triple(0).unit(0)).await.unwrap());
}
