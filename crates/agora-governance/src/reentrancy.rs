//! Call stack tracking for governance execution.
//!
//! While a proposal executes, the engine and the timelock are both on the
//! stack. A governed target that calls back into either of them (or into
//! itself) is rejected instead of observing half-finished state.

use std::collections::HashSet;

use agora_types::{Address, Amount};

use crate::error::{GovernanceError, Result};

/// Nested calls allowed below one top-level operation.
pub const MAX_CALL_DEPTH: usize = 64;

/// One active call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    pub address: Address,
    pub caller: Address,
    pub value: Amount,
    /// 0 for the outermost frame
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    active: HashSet<Address>,
    max_depth: usize,
}

impl CallStack {
    pub fn new() -> Self {
        Self::with_max_depth(MAX_CALL_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            active: HashSet::new(),
            max_depth,
        }
    }

    /// Push a frame for a call into `address`.
    ///
    /// # Errors
    /// `CallDepthExceeded` past the depth limit, `Reentrancy` when `address`
    /// already has an active frame.
    pub fn enter(&mut self, address: Address, caller: Address, value: Amount) -> Result<usize> {
        let depth = self.frames.len();
        if depth >= self.max_depth {
            return Err(GovernanceError::CallDepthExceeded { depth });
        }
        if self.active.contains(&address) {
            return Err(GovernanceError::Reentrancy(format!(
                "{:x} is already executing",
                address
            )));
        }

        self.active.insert(address);
        self.frames.push(CallFrame {
            address,
            caller,
            value,
            depth,
        });
        Ok(depth)
    }

    pub fn exit(&mut self) -> Result<CallFrame> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| GovernanceError::Reentrancy("call stack is empty".to_string()))?;
        self.active.remove(&frame.address);
        Ok(frame)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.active.contains(address)
    }

    pub fn current(&self) -> Option<&CallFrame> {
        self.frames.last()
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}
