//! Distributed hash-partitioned inner equi-join.
//!
//! The join runs as a cohort of peers over the [`crate::shardlines::comm`]
//! transport, in four phases separated by barriers:
//!
//! 1. **Partition** - every peer hashes the key tuple of each selected row
//!    and registers the row with its home peer (`hash % size`).
//! 2. **Plan** - every peer sorts its two index tables and merge-walks
//!    them; each hash-equality group becomes candidate messages to the
//!    peers owning the rhs rows.
//! 3. **Ship** - rhs owners project their candidate rows and ship the
//!    payloads to the peers owning the lhs rows.
//! 4. **Emit** - lhs owners verify full key equality (hashes only route;
//!    they never decide) and append joined records to their output shard.
//!
//! Output rows therefore live on the peer holding the originating lhs row,
//! and the total is independent of the cohort size.

mod context;
mod driver;
mod emitter;
mod error;
mod hash;
mod index;
mod messages;
mod planner;
mod router;
mod shipper;

pub use driver::{run_join, JoinArgs, JoinOutcome, JoinSpec, ResolvedJoin, ShardInput};
pub use error::{JoinError, JoinResult};
pub use hash::{combine, hash_key_tuple, hash_value};
pub use index::{HashEntry, HashIndex};
pub use messages::{JoinMessage, JoinSide, LhsRef};
