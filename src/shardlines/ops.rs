//! Whole-dataset operations besides the join.
//!
//! These ride on the same store/predicate/transport seams as the join but
//! have trivial communication patterns: `count` is a filtered local count
//! folded by one reduction.

use log::{debug, info, warn};
use thiserror::Error;

use crate::shardlines::comm::{CommError, Transport};
use crate::shardlines::join::ShardInput;
use crate::shardlines::predicate::{CompiledPredicate, PredicateError};
use crate::shardlines::store::{ShardStore, StoreError};

pub type CountResult<T> = Result<T, CountError>;

#[derive(Debug, Error)]
pub enum CountError {
    #[error("selection predicate rejected: {source}")]
    Filter {
        #[from]
        source: PredicateError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] CommError),
}

impl CountError {
    fn code(&self) -> u64 {
        match self {
            CountError::Filter { .. } => 2,
            CountError::Store(StoreError::Predicate(_)) => 2,
            CountError::Store(_) => 3,
            CountError::Transport(_) => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CountArgs {
    pub input: ShardInput,
}

#[derive(Debug, Clone)]
pub struct CountOutcome {
    pub rank: u32,
    pub local_count: u64,
    pub total_count: u64,
    pub error_code: u64,
    pub failure: Option<String>,
    /// Human-readable result, rank 0 only.
    pub summary: Option<String>,
}

impl CountOutcome {
    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }
}

/// Count the records selected by the input's predicate across the whole
/// dataset. Like the join driver, a failing peer contributes zero and an
/// error code rather than abandoning the collective.
pub async fn run_count<M, T>(comm: &mut T, args: &CountArgs) -> CountResult<CountOutcome>
where
    M: Send + 'static,
    T: Transport<M>,
{
    let rank = comm.rank();
    let mut failure: Option<CountError> = None;

    let local_count = match count_local(&args.input, rank) {
        Ok(count) => count,
        Err(e) => {
            warn!("rank {rank} failed: {e}");
            failure = Some(e);
            0
        }
    };

    let total = comm.all_reduce_sum(local_count).await?;
    let own_code = failure.as_ref().map(CountError::code).unwrap_or(0);
    let error_code = comm.all_reduce_max(own_code).await?;

    let summary = if rank == 0 {
        Some(if error_code == 0 {
            format!("counted {total} records.")
        } else {
            match &failure {
                Some(e) => e.to_string(),
                None => format!("a peer failed (error code {error_code})."),
            }
        })
    } else {
        None
    };
    if let Some(text) = &summary {
        info!("{text}");
    }

    Ok(CountOutcome {
        rank,
        local_count,
        total_count: total,
        error_code,
        failure: failure.map(|e| e.to_string()),
        summary,
    })
}

fn count_local(input: &ShardInput, rank: u32) -> CountResult<u64> {
    let mut store = ShardStore::open_read_only(&input.path, rank)?;
    if let Some(raw) = &input.filter {
        store.set_filter(CompiledPredicate::compile(raw)?);
    }
    let selected = store.count_selected()?;
    debug!(
        "count rank={rank}: {selected} of {} rows selected",
        store.count_local()
    );
    Ok(selected)
}
