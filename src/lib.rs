//! Shardlines: a persistent, sharded JSON-lines record store with
//! distributed relational operations.
//!
//! A logical dataset is split into per-peer shards on disk. Operations run
//! as a cohort of peers over an asynchronous message transport; the
//! flagship operation is [`shardlines::join::run_join`], a four-phase
//! distributed hash-partitioned inner equi-join.

pub mod shardlines;

// Re-export the main API
pub use shardlines::comm::{CohortPeer, CommError, LocalCohort, Transport};
pub use shardlines::join::{
    hash_key_tuple, hash_value, run_join, JoinArgs, JoinError, JoinMessage, JoinOutcome,
    JoinSpec, ShardInput,
};
pub use shardlines::ops::{run_count, CountArgs, CountOutcome};
pub use shardlines::predicate::{CompiledPredicate, PredicateError};
pub use shardlines::store::{discover_shard_count, shard_dir, ShardStore, StoreError};
pub use shardlines::values::{JsonObject, JsonValue};
