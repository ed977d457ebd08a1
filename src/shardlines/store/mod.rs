//! Persistent shard store: one directory per peer, one JSON record per
//! segment line, row-addressed random reads, filtered iteration.

mod error;
mod shard;

pub use error::{StoreError, StoreResult};
pub use shard::{discover_shard_count, shard_dir, ShardStore};
