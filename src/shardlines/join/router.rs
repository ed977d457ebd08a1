//! Phase 1: hash-partition one input side across the cohort.

use log::debug;

use crate::shardlines::comm::{Transport, FLOW_CONTROL_INTERVAL};
use crate::shardlines::store::ShardStore;

use super::context::JoinContext;
use super::error::JoinResult;
use super::hash;
use super::messages::{JoinMessage, JoinSide};

/// Visit every selected row of `store`, hash its key tuple, and register
/// the row with its home peer (`hash % size`). Registration for the local
/// rank short-circuits the transport; everything else is fire-and-forget,
/// with a progress pump between bursts so inbound deposits keep draining
/// while we send.
pub(crate) fn partition_side<T: Transport<JoinMessage>>(
    comm: &mut T,
    ctx: &mut JoinContext,
    store: &ShardStore,
    side: JoinSide,
    key_columns: &[String],
) -> JoinResult<()> {
    let rank = comm.rank();
    let peers = comm.size() as u64;
    let mut sent_since_pump = 0usize;
    let mut visited = 0u64;

    store.for_each_selected::<super::error::JoinError, _>(|row_index, record| {
        let key_hash = hash::hash_key_tuple(record, key_columns);
        let dest = (key_hash % peers) as u32;
        visited += 1;

        if dest == rank {
            ctx.deposit(side, key_hash, rank, row_index);
            return Ok(());
        }

        comm.send(
            dest,
            JoinMessage::Deposit {
                side,
                hash: key_hash,
                owner_rank: rank,
                owner_index: row_index,
            },
        )?;
        sent_since_pump += 1;
        if sent_since_pump >= FLOW_CONTROL_INTERVAL {
            sent_since_pump = 0;
            comm.progress(&mut |message| ctx.handle(message))?;
        }
        Ok(())
    })?;

    debug!(
        "phase 1 rank={rank}: partitioned {visited} {} rows",
        side.label()
    );
    Ok(())
}
