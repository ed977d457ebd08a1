//! Collective message runtime.
//!
//! The join runs as a cohort of peers exchanging fire-and-forget messages
//! and synchronizing on barriers. [`Transport`] is the seam: rank/size,
//! reliable unordered delivery, an explicit progress pump, and collectives.
//! The barrier is the strong one the algorithm leans on: it returns only
//! after every peer has entered *and* every in-flight message has been
//! delivered and handled, so each phase sees a stable view of the previous
//! one.
//!
//! [`LocalCohort`] is the in-process implementation: one tokio task per
//! peer over unbounded channels. Handlers run only on the owning peer's
//! task, inside `progress`/`barrier` calls, so per-peer state needs no
//! locking.

mod local;

pub use local::{CohortPeer, LocalCohort};

use async_trait::async_trait;
use thiserror::Error;

pub type CommResult<T> = Result<T, CommError>;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("peer {dest} is unreachable: mailbox closed")]
    PeerUnreachable { dest: u32 },

    #[error("cohort failed: {reason}")]
    CohortFailed { reason: String },
}

impl CommError {
    pub fn cohort(reason: impl Into<String>) -> Self {
        CommError::CohortFailed {
            reason: reason.into(),
        }
    }
}

/// How many fire-and-forget sends may go out between progress pumps. A
/// runtime without its own flow control would otherwise queue without
/// bound during phase 1.
pub const FLOW_CONTROL_INTERVAL: usize = 4096;

/// Point-to-point transport plus collectives for one peer of a cohort.
#[async_trait]
pub trait Transport<M: Send + 'static>: Send {
    fn rank(&self) -> u32;

    fn size(&self) -> u32;

    /// Reliable fire-and-forget delivery; no ordering between messages.
    fn send(&mut self, dest: u32, message: M) -> CommResult<()>;

    /// Hand every already-delivered message to `apply`; never blocks.
    /// Returns the number of messages handled.
    fn progress(&mut self, apply: &mut (dyn FnMut(M) + Send)) -> CommResult<usize>;

    /// Collective barrier; incoming messages are drained into `apply`
    /// until the whole cohort is quiescent.
    async fn barrier(&mut self, apply: &mut (dyn FnMut(M) + Send)) -> CommResult<()>;

    /// Collective sum. Call with no messages in flight.
    async fn all_reduce_sum(&mut self, value: u64) -> CommResult<u64>;

    /// Collective max. Call with no messages in flight.
    async fn all_reduce_max(&mut self, value: u64) -> CommResult<u64>;
}
