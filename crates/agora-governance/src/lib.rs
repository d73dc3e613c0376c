//! Agora Governance - token-weighted on-chain governance.
//!
//! This crate provides:
//! - Checkpointed voting ledgers with delegation
//! - Voting power aggregated across a primary and secondary tokens
//! - A delayed-execution timelock queue
//! - A proposal engine covering propose, vote, queue, execute and cancel
//! - A runtime that hosts all of the above and runs each operation atomically

pub mod action;
pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod events;
pub mod ledger;
pub mod proposal;
pub mod reentrancy;
pub mod runtime;
pub mod timelock;

pub use action::{Action, CallTarget, Host, Invocation, TargetRegistry};
pub use aggregator::{AggregateVotes, VotingPowerAggregator};
pub use checkpoint::{Checkpoint, CheckpointHistory};
pub use config::GovernanceConfig;
pub use engine::{GovernanceSettings, ProposalEngine};
pub use env::BlockEnv;
pub use error::{GovernanceError, Result};
pub use events::{EventLog, EventRecord, GovernanceEvent};
pub use ledger::{TokenLedgers, VotingLedger, VotingPower};
pub use proposal::{Proposal, ProposalActions, ProposalState, QuorumCounting, Receipt, VoteSupport};
pub use runtime::GovernanceRuntime;
pub use timelock::TimelockQueue;
