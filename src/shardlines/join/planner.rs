//! Phase 2: match hash groups across the two index tables and route
//! candidate groups to the peers owning the rhs rows.

use log::debug;

use crate::shardlines::comm::{Transport, FLOW_CONTROL_INTERVAL};

use super::context::JoinContext;
use super::error::JoinResult;
use super::index::{hash_group_end, owner_run_end};
use super::messages::{JoinMessage, LhsRef};

/// Sort both index tables, merge-walk the hash-equality groups, and emit
/// one `Plan` per (group, rhs owner). The lhs refs of a group are packed
/// once and shared by every rhs owner in it; a single rhs peer holding
/// many matching rows receives one coalesced message. Both tables are
/// consumed, which also clears them for the next phase.
pub(crate) fn plan_candidates<T: Transport<JoinMessage>>(
    comm: &mut T,
    ctx: &mut JoinContext,
) -> JoinResult<()> {
    let rank = comm.rank();
    let (mut lhs_index, mut rhs_index) = ctx.take_indexes();
    lhs_index.sort_by_hash_owner();
    rhs_index.sort_by_hash_owner();

    let lhs = lhs_index.entries();
    let rhs = rhs_index.entries();
    debug!(
        "phase 2 rank={rank}: merging {} lhs against {} rhs entries",
        lhs.len(),
        rhs.len()
    );

    let mut sent_since_pump = 0usize;
    let mut groups = 0u64;
    let (mut l, mut r) = (0usize, 0usize);

    while l < lhs.len() && r < rhs.len() {
        let l_end = hash_group_end(lhs, l);
        let r_end = hash_group_end(rhs, r);

        if lhs[l].hash < rhs[r].hash {
            l = l_end;
            continue;
        }
        if lhs[l].hash > rhs[r].hash {
            r = r_end;
            continue;
        }

        // Hashes agree: pack the lhs refs once for the whole group.
        let lhs_pack: Vec<LhsRef> = lhs[l..l_end]
            .iter()
            .map(|entry| LhsRef {
                owner_rank: entry.owner_rank,
                owner_index: entry.owner_index,
            })
            .collect();
        groups += 1;

        // Route the group to each distinct rhs owner; entries are sorted
        // by rank inside the group, so owners form contiguous runs.
        let mut run = r;
        while run < r_end {
            let dest = rhs[run].owner_rank;
            let run_end = owner_run_end(rhs, run, r_end);
            let rhs_indices: Vec<u64> = rhs[run..run_end]
                .iter()
                .map(|entry| entry.owner_index)
                .collect();

            if dest == rank {
                ctx.store_candidates(rhs_indices, lhs_pack.clone());
            } else {
                comm.send(
                    dest,
                    JoinMessage::Plan {
                        rhs_indices,
                        lhs_refs: lhs_pack.clone(),
                    },
                )?;
                sent_since_pump += 1;
                if sent_since_pump >= FLOW_CONTROL_INTERVAL {
                    sent_since_pump = 0;
                    comm.progress(&mut |message| ctx.handle(message))?;
                }
            }
            run = run_end;
        }

        l = l_end;
        r = r_end;
    }

    debug!("phase 2 rank={rank}: emitted {groups} candidate groups");
    Ok(())
}
