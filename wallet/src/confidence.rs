//! Confidence: how sure the wallet is that a transaction it knows about
//! will end up permanently in the chain.

use serde::{Deserialize, Serialize};

/// Where a transaction was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// Created and broadcast by this wallet.
    Self_,
    /// Received from the network, not yet created by this wallet.
    Network,
    /// Read back out of a persisted snapshot.
    Snapshot,
}

/// The wallet's belief about a transaction's permanence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Not yet seen in any block; `seen_by_peers` counts distinct peers
    /// that relayed it.
    Pending { seen_by_peers: u32 },
    /// Included in a block at the given height, confirmed by
    /// `depth` blocks (the including block itself counts as depth 1).
    Building { height: u32, depth: u32 },
    /// Was building but its including block was orphaned by a reorg and it
    /// has not reappeared in the new best chain.
    Dead,
}

impl Confidence {
    pub fn is_confirmed(&self, required_depth: u32) -> bool {
        matches!(self, Confidence::Building { depth, .. } if *depth >= required_depth)
    }
}
