//! Join wire messages.
//!
//! Three remote operations drive the four phases; each is fire-and-forget
//! and idempotent-free (delivered exactly once by the transport). Shipped
//! row payloads travel as serialized JSON text: the sender serializes the
//! projected rows once, the receiver parses its own copy, and no record
//! reference ever crosses a peer boundary.

use serde::{Deserialize, Serialize};

/// Which input a hash entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinSide {
    Lhs,
    Rhs,
}

impl JoinSide {
    pub fn index(self) -> usize {
        match self {
            JoinSide::Lhs => 0,
            JoinSide::Rhs => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JoinSide::Lhs => "left",
            JoinSide::Rhs => "right",
        }
    }
}

/// Location of one left-side row: the peer that owns it and its local
/// row index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LhsRef {
    pub owner_rank: u32,
    pub owner_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JoinMessage {
    /// Phase 1: register a row's key hash with its home peer.
    Deposit {
        side: JoinSide,
        hash: u64,
        owner_rank: u32,
        owner_index: u64,
    },
    /// Phase 2: one candidate group, routed to one rhs owner. Every row in
    /// `rhs_indices` is a potential match for every ref in `lhs_refs`.
    Plan {
        rhs_indices: Vec<u64>,
        lhs_refs: Vec<LhsRef>,
    },
    /// Phase 3: projected rhs rows for the listed local lhs rows, as a
    /// serialized JSON array.
    ShipRows {
        lhs_indices: Vec<u64>,
        payload: String,
    },
}
