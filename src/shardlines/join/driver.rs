//! Join configuration and the per-peer phase driver.
//!
//! Every peer runs the same sequence: validate the configuration, open the
//! pre-filtered inputs (phase 0), hash-partition both sides (phase 1),
//! plan candidates (phase 2), ship rhs payloads (phase 3), verify and emit
//! (phase 4), with a collective barrier after every phase. A peer that
//! fails records its error and stops doing productive work, but keeps
//! entering barriers and reductions so the rest of the cohort never
//! deadlocks. Any non-zero error code leaves the output shards undefined.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::shardlines::comm::Transport;
use crate::shardlines::predicate::CompiledPredicate;
use crate::shardlines::store::ShardStore;

use super::context::JoinContext;
use super::error::{JoinError, JoinResult};
use super::messages::{JoinMessage, JoinSide};
use super::{emitter, planner, router, shipper};

/// User-facing join configuration, the observable argument contract.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Join columns used for both sides when the per-side lists are empty.
    pub on: Vec<String>,
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    /// Output projections; empty selects every field.
    pub left_columns: Vec<String>,
    pub right_columns: Vec<String>,
    /// Join variant; only `"inner"` is implemented.
    pub how: String,
}

impl Default for JoinSpec {
    fn default() -> Self {
        JoinSpec {
            on: Vec::new(),
            left_on: Vec::new(),
            right_on: Vec::new(),
            left_columns: Vec::new(),
            right_columns: Vec::new(),
            how: "inner".to_string(),
        }
    }
}

/// The validated form the phases run against.
#[derive(Debug, Clone)]
pub struct ResolvedJoin {
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    pub left_columns: Vec<String>,
    pub right_columns: Vec<String>,
    /// The rhs projection actually shipped: the user's list widened by the
    /// rhs key columns so the receiving peer can verify equality. The
    /// output projection itself is not widened.
    pub rhs_send_list: Vec<String>,
}

impl JoinSpec {
    pub fn resolve(&self) -> JoinResult<ResolvedJoin> {
        let left_on = if self.left_on.is_empty() {
            self.on.clone()
        } else {
            self.left_on.clone()
        };
        let right_on = if self.right_on.is_empty() {
            self.on.clone()
        } else {
            self.right_on.clone()
        };

        if left_on.is_empty() {
            return Err(JoinError::config("join columns unspecified for the left side"));
        }
        if right_on.is_empty() {
            return Err(JoinError::config("join columns unspecified for the right side"));
        }
        if left_on.len() != right_on.len() {
            return Err(JoinError::config(format!(
                "left_on names {} columns, right_on names {}",
                left_on.len(),
                right_on.len()
            )));
        }
        if self.how != "inner" {
            return Err(JoinError::config(format!(
                "join variant '{}' is not implemented (only 'inner')",
                self.how
            )));
        }

        let mut rhs_send_list = self.right_columns.clone();
        add_key_columns(&right_on, &mut rhs_send_list);

        Ok(ResolvedJoin {
            left_on,
            right_on,
            left_columns: self.left_columns.clone(),
            right_columns: self.right_columns.clone(),
            rhs_send_list,
        })
    }
}

fn add_key_columns(key_columns: &[String], projection: &mut Vec<String>) {
    // An empty projection already carries every column.
    if projection.is_empty() {
        return;
    }
    for column in key_columns {
        if !projection.contains(column) {
            projection.push(column.clone());
        }
    }
}

/// One input dataset: its root directory plus an optional selection
/// predicate applied before the join sees any row.
#[derive(Debug, Clone)]
pub struct ShardInput {
    pub path: PathBuf,
    pub filter: Option<serde_json::Value>,
}

impl ShardInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ShardInput {
            path: path.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: serde_json::Value) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone)]
pub struct JoinArgs {
    /// Output dataset root; this peer's shard is created or truncated.
    pub output: PathBuf,
    pub left: ShardInput,
    pub right: ShardInput,
    pub spec: JoinSpec,
}

/// Per-peer result of a join run.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub rank: u32,
    pub local_output_count: u64,
    pub total_output_count: u64,
    /// Maximum error code across the cohort; zero means success.
    pub error_code: u64,
    /// This peer's own failure, if any.
    pub failure: Option<String>,
    /// Human-readable result, rank 0 only.
    pub summary: Option<String>,
}

impl JoinOutcome {
    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }
}

/// Run the distributed join from one peer of the cohort. Every peer of the
/// cohort must call this with identical arguments.
///
/// A per-peer failure is reported through the outcome, not the `Err` arm:
/// the peer keeps the collective schedule so its cohort can finish. `Err`
/// is reserved for a broken transport, where the cohort itself is gone.
pub async fn run_join<T>(comm: &mut T, args: &JoinArgs) -> JoinResult<JoinOutcome>
where
    T: Transport<JoinMessage>,
{
    let rank = comm.rank();
    let size = comm.size();
    let mut ctx = JoinContext::new();
    let mut failure: Option<JoinError> = None;

    debug!("join starting on rank {rank}/{size}");

    // Configuration errors are deterministic across peers but follow the
    // same record-and-participate path as everything else.
    let plan = record_failure(args.spec.resolve(), &mut failure);

    // Phase 0: open the pre-filtered inputs and pre-count.
    let mut left_store = None;
    let mut right_store = None;
    if failure.is_none() {
        if let Some((left, right)) = record_failure(open_inputs(args, rank), &mut failure) {
            left_store = Some(left);
            right_store = Some(right);
        }
    }

    // Phase 1: hash-partition both sides.
    if failure.is_none() {
        if let (Some(plan), Some(left), Some(right)) =
            (plan.as_ref(), left_store.as_ref(), right_store.as_ref())
        {
            note_failure(partition_inputs(comm, &mut ctx, plan, left, right), &mut failure);
        }
    }
    comm.barrier(&mut |message| ctx.handle(message)).await?;
    debug!(
        "barrier 1 rank={rank}: lhs index {} entries, rhs index {} entries",
        ctx.index_len(JoinSide::Lhs),
        ctx.index_len(JoinSide::Rhs)
    );

    // Phase 2: plan candidate groups.
    if failure.is_none() {
        note_failure(planner::plan_candidates(comm, &mut ctx), &mut failure);
    }
    comm.barrier(&mut |message| ctx.handle(message)).await?;
    debug!(
        "barrier 2 rank={rank}: {} candidate groups held",
        ctx.candidate_count()
    );

    // Phase 3: ship projected rhs payloads to the lhs owners.
    if failure.is_none() {
        if let (Some(plan), Some(right)) = (plan.as_ref(), right_store.as_ref()) {
            note_failure(
                shipper::ship_join_data(comm, &mut ctx, right, &plan.rhs_send_list),
                &mut failure,
            );
        }
    }
    comm.barrier(&mut |message| ctx.handle(message)).await?;
    debug!(
        "barrier 3 rank={rank}: {} join-data batches held",
        ctx.join_data_count()
    );

    // Phase 4: verify and emit into the freshly truncated output shard.
    let mut local_count = 0u64;
    if failure.is_none() {
        if let (Some(plan), Some(left)) = (plan.as_ref(), left_store.as_ref()) {
            match emit_phase(&mut ctx, left, plan, &args.output, rank) {
                Ok(count) => local_count = count,
                Err(e) => failure = Some(e),
            }
        }
    }
    comm.barrier(&mut |message| ctx.handle(message)).await?;

    // Final aggregation: total output size and the worst error code.
    let total = comm.all_reduce_sum(local_count).await?;
    let own_code = failure.as_ref().map(JoinError::code).unwrap_or(0);
    let error_code = comm.all_reduce_max(own_code).await?;

    if let Some(e) = &failure {
        warn!("rank {rank} failed: {e}");
    }

    let summary = if rank == 0 {
        Some(if error_code == 0 {
            format!("joined {total} records.")
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

    Ok(JoinOutcome {
        rank,
        local_output_count: local_count,
        total_output_count: total,
        error_code,
        failure: failure.map(|e| e.to_string()),
        summary,
    })
}

fn record_failure<V>(result: JoinResult<V>, failure: &mut Option<JoinError>) -> Option<V> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            *failure = Some(e);
            None
        }
    }
}

fn note_failure(result: JoinResult<()>, failure: &mut Option<JoinError>) {
    if let Err(e) = result {
        *failure = Some(e);
    }
}

fn open_inputs(args: &JoinArgs, rank: u32) -> JoinResult<(ShardStore, ShardStore)> {
    let left = open_input(&args.left, rank)?;
    let right = open_input(&args.right, rank)?;
    // The pre-count also forces every filter to evaluate once over the
    // shard, so predicate evaluation errors surface in phase 0.
    let left_selected = left.count_selected()?;
    let right_selected = right.count_selected()?;
    debug!(
        "phase 0 rank={rank}: left {left_selected} of {} rows selected, right {right_selected} of {} rows selected",
        left.count_local(),
        right.count_local()
    );
    Ok((left, right))
}

fn open_input(input: &ShardInput, rank: u32) -> JoinResult<ShardStore> {
    let mut store = ShardStore::open_read_only(&input.path, rank)?;
    if let Some(raw) = &input.filter {
        store.set_filter(CompiledPredicate::compile(raw)?);
    }
    Ok(store)
}

fn partition_inputs<T: Transport<JoinMessage>>(
    comm: &mut T,
    ctx: &mut JoinContext,
    plan: &ResolvedJoin,
    left: &ShardStore,
    right: &ShardStore,
) -> JoinResult<()> {
    router::partition_side(comm, ctx, left, JoinSide::Lhs, &plan.left_on)?;
    router::partition_side(comm, ctx, right, JoinSide::Rhs, &plan.right_on)
}

fn emit_phase(
    ctx: &mut JoinContext,
    left: &ShardStore,
    plan: &ResolvedJoin,
    output_root: &Path,
    rank: u32,
) -> JoinResult<u64> {
    let mut output = ShardStore::create_overwrite(output_root, rank)?;
    let emitted = emitter::emit_joined(ctx, left, plan, &mut output)?;
    output.flush()?;
    Ok(emitted)
}
