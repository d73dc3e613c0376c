//! Block environment seen by every operation.

use agora_types::{BlockNumber, Timestamp};
use serde::{Deserialize, Serialize};

/// Number and timestamp of the block an operation executes in.
///
/// Operations run *inside* block `number`; anything at a block strictly
/// below `number` is settled history and can be snapshotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnv {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub chain_id: u64,
}

impl BlockEnv {
    pub fn new(chain_id: u64, number: BlockNumber, timestamp: Timestamp) -> Self {
        Self {
            number,
            timestamp,
            chain_id,
        }
    }

    /// Advance by `blocks` blocks without moving the clock.
    pub fn mine(&mut self, blocks: u64) {
        self.number = self.number.saturating_add(blocks);
    }

    pub fn increase_time(&mut self, seconds: u64) {
        self.timestamp = self.timestamp.saturating_add(seconds);
    }

    /// Jump the clock forward. Time never moves backwards.
    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = self.timestamp.max(timestamp);
    }
}

impl Default for BlockEnv {
    fn default() -> Self {
        Self::new(1, 1, 0)
    }
}
