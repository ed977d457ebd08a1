//! Distribution-level properties of the join: results must not depend on
//! cohort size, on reruns, or on how rows are spread across peers.

mod common;

use common::{read_dataset, read_shard, record, run_merge, write_dataset, write_dataset_assigned};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shardlines::{hash_key_tuple, JoinArgs, JoinSpec, ShardInput};
use tempfile::TempDir;

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn fixture_rows() -> (Vec<String>, Vec<String>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for i in 0..40 {
        left.push(format!(r#"{{"k": {}, "a": {i}}}"#, i % 7));
        right.push(format!(r#"{{"k": {}, "b": {i}}}"#, i % 5));
    }
    // A couple of non-integer keys and a missing-key straggler.
    left.push(r#"{"k": "s", "a": -1}"#.to_string());
    right.push(r#"{"k": "s", "b": -1}"#.to_string());
    left.push(r#"{"a": -2}"#.to_string());
    (left, right)
}

async fn merge_with_peers(peers: u32, left_rows: &[&str], right_rows: &[&str]) -> Vec<String> {
    let (left, right, output) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    write_dataset(left.path(), peers, left_rows);
    write_dataset(right.path(), peers, right_rows);

    let args = JoinArgs {
        output: output.path().to_path_buf(),
        left: ShardInput::new(left.path()),
        right: ShardInput::new(right.path()),
        spec: JoinSpec {
            on: cols(&["k"]),
            ..JoinSpec::default()
        },
    };
    let outcomes = run_merge(peers, args).await;
    assert!(outcomes.iter().all(|o| o.is_success()));
    read_dataset(output.path(), peers)
}

#[tokio::test]
async fn output_multiset_is_independent_of_cohort_size() {
    let (left_rows, right_rows) = fixture_rows();
    let left_rows: Vec<&str> = left_rows.iter().map(String::as_str).collect();
    let right_rows: Vec<&str> = right_rows.iter().map(String::as_str).collect();

    let baseline = merge_with_peers(1, &left_rows, &right_rows).await;
    assert!(!baseline.is_empty());

    for peers in [2, 3, 5] {
        let result = merge_with_peers(peers, &left_rows, &right_rows).await;
        assert_eq!(result, baseline, "cohort of {peers} diverged");
    }
}

#[tokio::test]
async fn rerunning_the_same_join_is_idempotent() {
    let (left_rows, right_rows) = fixture_rows();
    let left_rows: Vec<&str> = left_rows.iter().map(String::as_str).collect();
    let right_rows: Vec<&str> = right_rows.iter().map(String::as_str).collect();

    let first = merge_with_peers(3, &left_rows, &right_rows).await;
    let second = merge_with_peers(3, &left_rows, &right_rows).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn peer_assignment_of_inputs_does_not_change_the_output() {
    let (left_rows, right_rows) = fixture_rows();
    let peers = 3;

    let round_robin = {
        let left_rows: Vec<&str> = left_rows.iter().map(String::as_str).collect();
        let right_rows: Vec<&str> = right_rows.iter().map(String::as_str).collect();
        merge_with_peers(peers, &left_rows, &right_rows).await
    };

    // Same records, arbitrary shard assignment.
    let mut rng = StdRng::seed_from_u64(41);
    let left_assigned: Vec<(&str, u32)> = left_rows
        .iter()
        .map(|row| (row.as_str(), rng.gen_range(0..peers)))
        .collect();
    let right_assigned: Vec<(&str, u32)> = right_rows
        .iter()
        .map(|row| (row.as_str(), rng.gen_range(0..peers)))
        .collect();

    let (left, right, output) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    write_dataset_assigned(left.path(), peers, &left_assigned);
    write_dataset_assigned(right.path(), peers, &right_assigned);

    let args = JoinArgs {
        output: output.path().to_path_buf(),
        left: ShardInput::new(left.path()),
        right: ShardInput::new(right.path()),
        spec: JoinSpec {
            on: cols(&["k"]),
            ..JoinSpec::default()
        },
    };
    let outcomes = run_merge(peers, args).await;
    assert!(outcomes.iter().all(|o| o.is_success()));

    assert_eq!(read_dataset(output.path(), peers), round_robin);
}

#[tokio::test]
async fn joined_rows_land_on_the_peer_owning_the_left_row() {
    let peers: u32 = 4;
    // Tag every left row with its assigned shard so output placement can
    // be traced back.
    let left_rows: Vec<String> = (0..peers)
        .map(|rank| format!(r#"{{"k": {}, "owner": {rank}}}"#, rank % 2))
        .collect();
    let left_assigned: Vec<(&str, u32)> = left_rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.as_str(), i as u32))
        .collect();
    let right_rows = [r#"{"k": 0, "b": "even"}"#, r#"{"k": 1, "b": "odd"}"#];

    let (left, right, output) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    write_dataset_assigned(left.path(), peers, &left_assigned);
    write_dataset(right.path(), peers, &right_rows);

    let args = JoinArgs {
        output: output.path().to_path_buf(),
        left: ShardInput::new(left.path()),
        right: ShardInput::new(right.path()),
        spec: JoinSpec {
            on: cols(&["k"]),
            ..JoinSpec::default()
        },
    };
    let outcomes = run_merge(peers, args).await;
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(outcomes[0].total_output_count, peers as u64);

    for rank in 0..peers {
        let shard = read_shard(output.path(), rank);
        assert_eq!(shard.len(), 1, "shard {rank} holds {shard:?}");
        assert!(
            shard[0].contains(&format!(r#""owner_l":{rank}"#)),
            "shard {rank} holds {shard:?}"
        );
    }
}

#[test]
fn key_tuple_hashes_are_reproducible_across_representations() {
    let columns = cols(&["k", "tag"]);
    let original = record(r#"{"k": [1, {"x": "y"}], "tag": "t", "noise": 3}"#);

    // A record surviving a segment round trip hashes identically.
    let reserialized: shardlines::JsonObject =
        serde_json::from_str(&serde_json::to_string(&original).unwrap()).unwrap();
    assert_eq!(
        hash_key_tuple(&original, &columns),
        hash_key_tuple(&reserialized, &columns)
    );

    // Non-key fields do not participate.
    let different_noise = record(r#"{"k": [1, {"x": "y"}], "tag": "t", "noise": 4}"#);
    assert_eq!(
        hash_key_tuple(&original, &columns),
        hash_key_tuple(&different_noise, &columns)
    );
}
