//! Proposal actions and the generic call capability used to run them.
//!
//! Governance never knows the interface of the contracts it governs. An
//! [`Action`] is a tagged value `{target, value, signature, data}`; when the
//! timelock runs it, the signature is turned into a 4-byte selector and the
//! call goes through a [`Host`], which routes it to whatever lives at
//! `target`: a registered [`CallTarget`], or one of the governance components
//! themselves.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use agora_crypto::hash_with_domain;
use agora_types::{Address, Amount, Hash, Timestamp};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};
use crate::events::GovernanceEvent;

const TX_HASH_DOMAIN: &str = "agora.timelock.tx";

/// One call a proposal (or a timelock admin) wants executed.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Action {
    pub target: Address,
    pub value: Amount,
    /// Function signature, e.g. `setPendingAdmin(address)`. Empty means
    /// `data` already is the complete calldata.
    pub signature: String,
    pub data: Vec<u8>,
}

impl Action {
    pub fn new(target: Address, value: Amount, signature: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            target,
            value,
            signature: signature.into(),
            data,
        }
    }

    /// Build a zero-value action whose arguments are borsh encoded.
    pub fn call<T: BorshSerialize>(target: Address, signature: &str, args: &T) -> Result<Self> {
        Ok(Self::new(target, 0, signature, encode_args(args)?))
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }

    /// Bytes delivered to the target.
    pub fn calldata(&self) -> Vec<u8> {
        if self.signature.is_empty() {
            return self.data.clone();
        }
        let mut calldata = Vec::with_capacity(4 + self.data.len());
        calldata.extend_from_slice(&selector(&self.signature));
        calldata.extend_from_slice(&self.data);
        calldata
    }

    /// Identity of this action scheduled for `eta` in the timelock. The
    /// preimage is the borsh encoding of `(action, eta)`.
    pub fn tx_hash(&self, eta: Timestamp) -> Result<Hash> {
        let preimage = encode_args(&(self, eta))?;
        Ok(hash_with_domain(&preimage, TX_HASH_DOMAIN))
    }
}

/// First four bytes of the blake3 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = blake3::hash(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.as_bytes()[..4]);
    out
}

pub fn encode_args<T: BorshSerialize>(args: &T) -> Result<Vec<u8>> {
    borsh::to_vec(args).map_err(|e| GovernanceError::InvalidCalldata(e.to_string()))
}

pub fn decode_args<T: BorshDeserialize>(data: &[u8]) -> Result<T> {
    borsh::from_slice(data).map_err(|e| GovernanceError::InvalidCalldata(e.to_string()))
}

/// A call in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub caller: Address,
    pub target: Address,
    pub value: Amount,
    pub calldata: Vec<u8>,
}

impl Invocation {
    pub fn new(caller: Address, target: Address, value: Amount, calldata: Vec<u8>) -> Self {
        Self {
            caller,
            target,
            value,
            calldata,
        }
    }

    pub fn selector(&self) -> Option<[u8; 4]> {
        self.calldata.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }

    /// Calldata after the selector.
    pub fn args(&self) -> &[u8] {
        self.calldata.get(4..).unwrap_or(&[])
    }

    /// Does this call target the function `signature`?
    pub fn is(&self, signature: &str) -> bool {
        self.selector() == Some(selector(signature))
    }

    pub fn decode<T: BorshDeserialize>(&self) -> Result<T> {
        decode_args(self.args())
    }

    pub(crate) fn unknown_selector(&self) -> GovernanceError {
        let sel = self.selector().map(|s| format!("{:02x?}", s)).unwrap_or_default();
        GovernanceError::UnknownSelector(sel)
    }
}

/// Execution context handed to anything that can perform or receive calls.
pub trait Host {
    fn env(&self) -> &BlockEnv;

    fn emit(&mut self, event: GovernanceEvent);

    /// Perform a call and return its output.
    fn call(&mut self, invocation: Invocation) -> Result<Vec<u8>>;
}

/// An opaque governed contract.
///
/// `host` lets the target make nested calls; those go through the same
/// re-entrancy checks as the outer call.
pub trait CallTarget: fmt::Debug {
    fn invoke(&mut self, invocation: &Invocation, host: &mut dyn Host) -> Result<Vec<u8>>;

    fn clone_box(&self) -> Box<dyn CallTarget>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn CallTarget> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Governed contracts by address.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<Address, Box<dyn CallTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: Address, target: Box<dyn CallTarget>) -> Result<()> {
        if address.is_zero() || self.targets.contains_key(&address) {
            return Err(GovernanceError::InvalidParameter(format!(
                "target address {:x} unavailable",
                address
            )));
        }
        self.targets.insert(address, target);
        Ok(())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.targets.contains_key(address)
    }

    /// Borrow a target as its concrete type.
    pub fn get<T: 'static>(&self, address: &Address) -> Option<&T> {
        self.targets.get(address)?.as_any().downcast_ref::<T>()
    }

    /// Detach a target for the duration of a call so it can receive the
    /// host mutably.
    pub(crate) fn take(&mut self, address: &Address) -> Option<Box<dyn CallTarget>> {
        self.targets.remove(address)
    }

    pub(crate) fn restore(&mut self, address: Address, target: Box<dyn CallTarget>) {
        self.targets.insert(address, target);
    }
}
