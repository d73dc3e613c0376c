//! Events emitted by the governance components.

use agora_types::{Address, Amount, BlockNumber, Hash, Timestamp};
use serde::Serialize;

use crate::action::Action;
use crate::proposal::VoteSupport;

/// Observable state changes, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum GovernanceEvent {
    // Voting ledger
    DelegateChanged {
        token: Address,
        delegator: Address,
        from_delegate: Address,
        to_delegate: Address,
    },
    DelegateVotesChanged {
        token: Address,
        delegate: Address,
        previous_votes: Amount,
        new_votes: Amount,
    },

    // Aggregator
    SupportedTokensUpdated {
        old: Vec<Address>,
        new: Vec<Address>,
    },

    // Proposal engine
    ProposalCreated {
        id: u64,
        proposer: Address,
        targets: Vec<Address>,
        values: Vec<Amount>,
        signatures: Vec<String>,
        calldatas: Vec<Vec<u8>>,
        start_block: BlockNumber,
        end_block: BlockNumber,
        description: String,
    },
    VoteCast {
        voter: Address,
        proposal_id: u64,
        support: VoteSupport,
        votes: Amount,
        reason: Option<String>,
    },
    ProposalCanceled {
        id: u64,
    },
    ProposalQueued {
        id: u64,
        eta: Timestamp,
    },
    ProposalExecuted {
        id: u64,
    },
    VotingDelaySet {
        old: u64,
        new: u64,
    },
    VotingPeriodSet {
        old: u64,
        new: u64,
    },
    ProposalThresholdSet {
        old: Amount,
        new: Amount,
    },
    QuorumNumeratorUpdated {
        old: u64,
        new: u64,
    },
    GuardianAbdicated {
        guardian: Address,
    },
    TimelockChange {
        old: Address,
        new: Address,
    },

    // Timelock
    CallScheduled {
        hash: Hash,
        target: Address,
        value: Amount,
        signature: String,
        data: Vec<u8>,
        eta: Timestamp,
    },
    CallExecuted {
        hash: Hash,
        target: Address,
        value: Amount,
        eta: Timestamp,
    },
    Cancelled {
        hash: Hash,
    },
    NewPendingAdmin {
        pending_admin: Address,
    },
    NewAdmin {
        admin: Address,
    },
    NewDelay {
        delay: u64,
    },
}

impl GovernanceEvent {
    pub(crate) fn call_scheduled(hash: Hash, action: &Action, eta: Timestamp) -> Self {
        GovernanceEvent::CallScheduled {
            hash,
            target: action.target,
            value: action.value,
            signature: action.signature.clone(),
            data: action.data.clone(),
            eta,
        }
    }
}

/// An event together with the block it was emitted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub block: BlockNumber,
    pub event: GovernanceEvent,
}

/// Append-only event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, block: BlockNumber, event: GovernanceEvent) {
        self.records.push(EventRecord { block, event });
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn events(&self) -> impl Iterator<Item = &GovernanceEvent> {
        self.records.iter().map(|r| &r.event)
    }

    pub fn last(&self) -> Option<&GovernanceEvent> {
        self.records.last().map(|r| &r.event)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_events(self) -> impl Iterator<Item = GovernanceEvent> {
        self.records.into_iter().map(|r| r.event)
    }

    /// Drop events emitted after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_keeps_order_and_block() {
        let mut log = EventLog::new();
        log.emit(3, GovernanceEvent::ProposalCanceled { id: 1 });
        log.emit(4, GovernanceEvent::ProposalExecuted { id: 2 });

        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].block, 3);
        assert_eq!(log.last(), Some(&GovernanceEvent::ProposalExecuted { id: 2 }));

        log.truncate(1);
        assert_eq!(log.last(), Some(&GovernanceEvent::ProposalCanceled { id: 1 }));
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_string(&GovernanceEvent::ProposalQueued { id: 7, eta: 99 }).unwrap();
        assert_eq!(json, r#"{"event":"ProposalQueued","id":7,"eta":99}"#);
    }
}
