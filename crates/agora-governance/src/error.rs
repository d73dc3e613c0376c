use agora_types::{Address, Amount, BlockNumber, Hash, Timestamp};
use thiserror::Error;

use crate::proposal::ProposalState;

/// Errors that can occur in governance operations.
///
/// Every failure rejects the whole operation; the runtime rolls back any
/// state written before the error surfaced.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernanceError {
    #[error("Proposal action arity mismatch: {0}")]
    ArityMismatch(String),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(u64),

    #[error("Proposer votes below threshold: {votes} < {threshold}")]
    ThresholdNotMet { votes: Amount, threshold: Amount },

    #[error("One live proposal per proposer: proposal {proposal_id} is {state:?}")]
    ProposerHasLiveProposal { proposal_id: u64, state: ProposalState },

    #[error("Voting is closed for proposal {proposal_id} ({state:?})")]
    VotingClosed { proposal_id: u64, state: ProposalState },

    #[error("Voter {voter:x} already voted on proposal {proposal_id}")]
    AlreadyVoted { proposal_id: u64, voter: Address },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature expired at {expiry}, now {now}")]
    SignatureExpired { expiry: Timestamp, now: Timestamp },

    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: u64, actual: u64 },

    #[error("Proposal {proposal_id} action already queued at eta: {hash}")]
    ActionAlreadyQueued { proposal_id: u64, hash: Hash },

    #[error("Cannot {operation} proposal {proposal_id} while it is {state:?}")]
    InvalidProposalState {
        proposal_id: u64,
        state: ProposalState,
        operation: &'static str,
    },

    #[error("Block {block} not yet determined (current block {current})")]
    NotYetDetermined { block: BlockNumber, current: BlockNumber },

    #[error("Insufficient balance for {account:x}: {balance} < {amount}")]
    InsufficientBalance { account: Address, balance: Amount, amount: Amount },

    #[error("Vote amount overflows")]
    VotesOverflow,

    #[error("Vote amount underflows")]
    VotesUnderflow,

    #[error("Invalid supported token: {0:x}")]
    InvalidSupportedToken(Address),

    #[error("Duplicate supported token: {0:x}")]
    DuplicateSupportedToken(Address),

    #[error("Unknown token: {0:x}")]
    UnknownToken(Address),

    #[error("Caller {0:x} is not the timelock admin")]
    NotAdmin(Address),

    #[error("Caller {0:x} is not the pending timelock admin")]
    NotPendingAdmin(Address),

    #[error("Caller {0:x} is not the guardian")]
    NotGuardian(Address),

    #[error("Caller {0:x} is not governance")]
    NotGovernance(Address),

    #[error("Caller {0:x} is not the timelock itself")]
    NotTimelock(Address),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Estimated execution block must satisfy delay: eta {eta} < {earliest}")]
    InsufficientDelay { eta: Timestamp, earliest: Timestamp },

    #[error("Transaction hasn't surpassed time lock: now {now} < eta {eta}")]
    TooEarly { eta: Timestamp, now: Timestamp },

    #[error("Transaction is stale: now {now} > {deadline}")]
    Stale { deadline: Timestamp, now: Timestamp },

    #[error("Transaction already queued: {0}")]
    AlreadyQueued(Hash),

    #[error("Transaction hasn't been queued: {0}")]
    NotQueued(Hash),

    #[error("Delay {delay} outside [{min}, {max}]")]
    InvalidDelay { delay: u64, min: u64, max: u64 },

    #[error("Insufficient timelock funds: {balance} < {value}")]
    InsufficientFunds { balance: Amount, value: Amount },

    #[error("Transaction execution reverted: {0}")]
    ExecutionReverted(String),

    #[error("Reentrancy violation: {0}")]
    Reentrancy(String),

    #[error("Call depth exceeded: {depth}")]
    CallDepthExceeded { depth: usize },

    #[error("Unknown call target: {0:x}")]
    UnknownTarget(Address),

    #[error("Unknown function selector: {0}")]
    UnknownSelector(String),

    #[error("Invalid calldata: {0}")]
    InvalidCalldata(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<agora_crypto::CryptoError> for GovernanceError {
    fn from(e: agora_crypto::CryptoError) -> Self {
        GovernanceError::InvalidSignature(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::ArityMismatch("4 targets, 3 values".to_string());
        assert!(err.to_string().contains("arity mismatch"));
    }

    #[test]
    fn test_threshold_error_carries_amounts() {
        let err = GovernanceError::ThresholdNotMet { votes: 100, threshold: 200 };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("200"));
    }

    #[test]
    fn test_state_errors_name_the_state() {
        let err = GovernanceError::VotingClosed {
            proposal_id: 3,
            state: ProposalState::Pending,
        };
        assert!(err.to_string().contains("Pending"));
    }
}
