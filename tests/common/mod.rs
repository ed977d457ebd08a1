//! Shared fixtures for the distributed-operation integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use shardlines::{run_join, JoinArgs, JoinOutcome, LocalCohort, ShardStore};

pub fn record(text: &str) -> shardlines::JsonObject {
    serde_json::from_str(text).unwrap()
}

/// Write a dataset of `peers` shards, distributing rows round-robin.
pub fn write_dataset(root: &Path, peers: u32, rows: &[&str]) {
    for rank in 0..peers {
        let mut store = ShardStore::create_overwrite(root, rank).unwrap();
        for (i, row) in rows.iter().enumerate() {
            if i as u32 % peers == rank {
                store.append_local(&record(row)).unwrap();
            }
        }
        store.flush().unwrap();
    }
}

/// Write a dataset with an explicit row-to-shard assignment.
pub fn write_dataset_assigned(root: &Path, peers: u32, rows: &[(&str, u32)]) {
    for rank in 0..peers {
        let mut store = ShardStore::create_overwrite(root, rank).unwrap();
        for (row, owner) in rows {
            if *owner == rank {
                store.append_local(&record(row)).unwrap();
            }
        }
        store.flush().unwrap();
    }
}

/// Key-order-insensitive canonical form of one record.
pub fn canonical(record: &shardlines::JsonObject) -> String {
    let mut fields: Vec<String> = record
        .iter()
        .map(|(key, value)| format!("{:?}:{}", key, serde_json::to_string(value).unwrap()))
        .collect();
    fields.sort();
    format!("{{{}}}", fields.join(","))
}

/// Read every shard of a dataset into a sorted canonical multiset.
pub fn read_dataset(root: &Path, peers: u32) -> Vec<String> {
    let mut rows = Vec::new();
    for rank in 0..peers {
        rows.extend(read_shard(root, rank));
    }
    rows.sort();
    rows
}

/// Read one shard of a dataset into a sorted canonical multiset.
pub fn read_shard(root: &Path, rank: u32) -> Vec<String> {
    let store = ShardStore::open_read_only(root, rank).unwrap();
    let mut rows: Vec<String> = (0..store.count_local())
        .map(|i| canonical(&store.at(i).unwrap()))
        .collect();
    rows.sort();
    rows
}

/// Canonical multiset of expected rows given as JSON literals.
pub fn expected(rows: &[&str]) -> Vec<String> {
    let mut rows: Vec<String> = rows.iter().map(|r| canonical(&record(r))).collect();
    rows.sort();
    rows
}

/// Run the join on an in-process cohort and return the per-rank outcomes.
pub async fn run_merge(peers: u32, args: JoinArgs) -> Vec<JoinOutcome> {
    let args = Arc::new(args);
    LocalCohort::run(peers, |mut peer| {
        let args = Arc::clone(&args);
        async move { run_join(&mut peer, &args).await }
    })
    .await
    .unwrap()
    .into_iter()
    .map(|outcome| outcome.unwrap())
    .collect()
}
