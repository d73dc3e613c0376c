//! Append-only checkpoint histories.
//!
//! A history records a value together with the block it became valid in.
//! Writes only ever happen at the current block, so `from_block` is strictly
//! increasing; a second write in the same block overwrites the last entry in
//! place instead of appending.

use agora_types::{Amount, BlockNumber};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Value valid from `from_block` until superseded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Checkpoint {
    pub from_block: BlockNumber,
    pub votes: Amount,
}

/// Per-account (or per-parameter) checkpoint sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHistory {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(pos)
    }

    pub fn as_slice(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Value of the latest checkpoint, zero when empty.
    pub fn latest(&self) -> Amount {
        self.checkpoints.last().map(|c| c.votes).unwrap_or(0)
    }

    /// Record `votes` as valid from `block`. Returns the previous latest value.
    pub fn write(&mut self, block: BlockNumber, votes: Amount) -> Amount {
        let previous = self.latest();
        match self.checkpoints.last_mut() {
            Some(last) if last.from_block == block => last.votes = votes,
            Some(last) => {
                debug_assert!(last.from_block < block, "checkpoint written out of order");
                self.checkpoints.push(Checkpoint { from_block: block, votes });
            }
            None => self.checkpoints.push(Checkpoint { from_block: block, votes }),
        }
        previous
    }

    /// Value in effect at `block`: the latest checkpoint with
    /// `from_block <= block`, or zero if `block` precedes the first one.
    pub fn at(&self, block: BlockNumber) -> Amount {
        let n = self.checkpoints.len();
        if n == 0 {
            return 0;
        }

        // Most lookups are for recent blocks.
        if self.checkpoints[n - 1].from_block <= block {
            return self.checkpoints[n - 1].votes;
        }
        if self.checkpoints[0].from_block > block {
            return 0;
        }

        let mut lower = 0;
        let mut upper = n - 1;
        while upper > lower {
            // ceil, avoiding overflow
            let center = upper - (upper - lower) / 2;
            let cp = self.checkpoints[center];
            if cp.from_block == block {
                return cp.votes;
            } else if cp.from_block < block {
                lower = center;
            } else {
                upper = center - 1;
            }
        }
        self.checkpoints[lower].votes
    }
}
