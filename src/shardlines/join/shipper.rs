//! Phase 3: project and ship rhs row payloads to the lhs owners.

use log::debug;

use crate::shardlines::comm::{Transport, FLOW_CONTROL_INTERVAL};
use crate::shardlines::store::ShardStore;
use crate::shardlines::values::JsonObject;

use super::context::{JoinContext, RowPayload};
use super::error::{JoinError, JoinResult};
use super::messages::JoinMessage;

/// For every candidate group: load the listed local rhs rows, project them
/// with the send list (the user's rhs projection widened by the rhs key
/// columns, which the verifier needs), and ship the whole projected batch
/// to every distinct lhs owner in the group. The receiving side filters by
/// full-key equality, so over-shipping costs bandwidth, not correctness.
pub(crate) fn ship_join_data<T: Transport<JoinMessage>>(
    comm: &mut T,
    ctx: &mut JoinContext,
    rhs_store: &ShardStore,
    send_list: &[String],
) -> JoinResult<()> {
    let rank = comm.rank();
    let candidate_groups = ctx.take_candidates();
    debug!(
        "phase 3 rank={rank}: shipping {} candidate groups",
        candidate_groups.len()
    );

    let mut sent_since_pump = 0usize;

    for group in candidate_groups {
        let mut rows: Vec<JsonObject> = Vec::with_capacity(group.rhs_indices.len());
        for &rhs_index in &group.rhs_indices {
            rows.push(rhs_store.at(rhs_index)?.project(send_list));
        }

        // Serialized lazily: a group whose lhs owners are all local never
        // touches the wire format.
        let mut payload: Option<String> = None;

        // Walk the lhs refs in contiguous same-owner runs, preserving
        // their order inside each run.
        let refs = &group.lhs_refs;
        let mut i = 0;
        while i < refs.len() {
            let dest = refs[i].owner_rank;
            let mut j = i + 1;
            while j < refs.len() && refs[j].owner_rank == dest {
                j += 1;
            }
            let lhs_indices: Vec<u64> = refs[i..j].iter().map(|r| r.owner_index).collect();

            if dest == rank {
                ctx.store_join_data(lhs_indices, RowPayload::Local(rows.clone()));
            } else {
                let text = match &payload {
                    Some(text) => text.clone(),
                    None => {
                        let text = serde_json::to_string(&rows).map_err(|e| {
                            JoinError::shape(format!("cannot serialize shipped rows: {e}"))
                        })?;
                        payload = Some(text.clone());
                        text
                    }
                };
                comm.send(
                    dest,
                    JoinMessage::ShipRows {
                        lhs_indices,
                        payload: text,
                    },
                )?;
                sent_since_pump += 1;
                if sent_since_pump >= FLOW_CONTROL_INTERVAL {
                    sent_since_pump = 0;
                    comm.progress(&mut |message| ctx.handle(message))?;
                }
            }
            i = j;
        }
    }

    Ok(())
}
