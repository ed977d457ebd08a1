//! Phase-scoped join state.
//!
//! One [`JoinContext`] lives on each peer for the duration of a join. It
//! owns the buffers the remote handlers append into: the two hash index
//! tables (phase 1), the candidate groups (phase 2), and the shipped join
//! data (phase 3). Each phase takes its input buffer out of the context,
//! which is also what clears it. All mutation happens on the owning peer's
//! task; no locking.

use crate::shardlines::store::ShardStore;
use crate::shardlines::values::{JsonObject, JsonValue};

use super::error::{JoinError, JoinResult};
use super::index::{HashEntry, HashIndex};
use super::messages::{JoinMessage, JoinSide, LhsRef};

/// One candidate group on an rhs-owner peer: every local rhs row listed is
/// a potential match for every remote lhs ref listed.
#[derive(Debug)]
pub(crate) struct MergeCandidates {
    pub rhs_indices: Vec<u64>,
    pub lhs_refs: Vec<LhsRef>,
}

/// Shipped rows for one batch of local lhs rows on an lhs-owner peer.
#[derive(Debug)]
pub(crate) struct JoinData {
    pub lhs_indices: Vec<u64>,
    pub payload: RowPayload,
}

/// Rows either short-circuited locally or received as serialized text.
/// Wire payloads are parsed where the error can be reported: in phase 4,
/// against the store that will own the records.
#[derive(Debug)]
pub(crate) enum RowPayload {
    Local(Vec<JsonObject>),
    Wire(String),
}

impl RowPayload {
    pub fn into_rows(self, store: &ShardStore) -> JoinResult<Vec<JsonObject>> {
        match self {
            RowPayload::Local(rows) => Ok(rows),
            RowPayload::Wire(text) => {
                let value: JsonValue = serde_json::from_str(&text).map_err(|e| {
                    JoinError::shape(format!("shipped payload is not valid JSON: {e}"))
                })?;
                match value {
                    JsonValue::Array(items) => items
                        .into_iter()
                        .map(|item| store.import_record(item).map_err(JoinError::from))
                        .collect(),
                    other => Err(JoinError::shape(format!(
                        "shipped payload must be an array of records, found {}",
                        other.type_name()
                    ))),
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct JoinContext {
    index: [HashIndex; 2],
    merge_candidates: Vec<MergeCandidates>,
    join_data: Vec<JoinData>,
}

impl JoinContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote-handler dispatch: applied to every incoming message from
    /// inside `progress`/`barrier` calls.
    pub fn handle(&mut self, message: JoinMessage) {
        match message {
            JoinMessage::Deposit {
                side,
                hash,
                owner_rank,
                owner_index,
            } => self.deposit(side, hash, owner_rank, owner_index),
            JoinMessage::Plan {
                rhs_indices,
                lhs_refs,
            } => self.store_candidates(rhs_indices, lhs_refs),
            JoinMessage::ShipRows {
                lhs_indices,
                payload,
            } => self.store_join_data(lhs_indices, RowPayload::Wire(payload)),
        }
    }

    pub fn deposit(&mut self, side: JoinSide, hash: u64, owner_rank: u32, owner_index: u64) {
        self.index[side.index()].push(HashEntry {
            hash,
            owner_rank,
            owner_index,
        });
    }

    pub fn store_candidates(&mut self, rhs_indices: Vec<u64>, lhs_refs: Vec<LhsRef>) {
        self.merge_candidates.push(MergeCandidates {
            rhs_indices,
            lhs_refs,
        });
    }

    pub fn store_join_data(&mut self, lhs_indices: Vec<u64>, payload: RowPayload) {
        self.join_data.push(JoinData {
            lhs_indices,
            payload,
        });
    }

    pub fn index_len(&self, side: JoinSide) -> usize {
        self.index[side.index()].len()
    }

    pub fn candidate_count(&self) -> usize {
        self.merge_candidates.len()
    }

    pub fn join_data_count(&self) -> usize {
        self.join_data.len()
    }

    /// Move both index tables out for the planner; the context's copies
    /// are left empty.
    pub fn take_indexes(&mut self) -> (HashIndex, HashIndex) {
        let [lhs, rhs] = std::mem::take(&mut self.index);
        (lhs, rhs)
    }

    pub fn take_candidates(&mut self) -> Vec<MergeCandidates> {
        std::mem::take(&mut self.merge_candidates)
    }

    pub fn take_join_data(&mut self) -> Vec<JoinData> {
        std::mem::take(&mut self.join_data)
    }
}
