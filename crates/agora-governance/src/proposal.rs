//! Proposal records and their lifecycle.
//!
//! Pending -> Active -> Canceled/Defeated/Succeeded -> Queued -> Expired/Executed
//!
//! The state is never stored. It is derived from the record, the current
//! block and time, and the quorum at the proposal's snapshot block.

use std::collections::{BTreeMap, HashMap};

use agora_types::{Address, Amount, BlockNumber, Timestamp};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};

/// Proposal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Pending = 0,
    Active = 1,
    Canceled = 2,
    Defeated = 3,
    Succeeded = 4,
    Queued = 5,
    Expired = 6,
    Executed = 7,
}

impl ProposalState {
    /// Pending or Active: the proposer may not open another proposal.
    pub fn is_live(&self) -> bool {
        matches!(self, ProposalState::Pending | ProposalState::Active)
    }

    pub fn can_vote(&self) -> bool {
        matches!(self, ProposalState::Active)
    }
}

/// Ballot choice.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum VoteSupport {
    #[default]
    Against,
    For,
    /// Counts toward quorum only under [`QuorumCounting::ForAndAbstain`]
    Abstain,
}

impl VoteSupport {
    pub fn as_u8(&self) -> u8 {
        match self {
            VoteSupport::Against => 0,
            VoteSupport::For => 1,
            VoteSupport::Abstain => 2,
        }
    }
}

impl From<bool> for VoteSupport {
    fn from(support: bool) -> Self {
        if support {
            VoteSupport::For
        } else {
            VoteSupport::Against
        }
    }
}

impl TryFrom<u8> for VoteSupport {
    type Error = GovernanceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(VoteSupport::Against),
            1 => Ok(VoteSupport::For),
            2 => Ok(VoteSupport::Abstain),
            other => Err(GovernanceError::InvalidParameter(format!(
                "invalid vote type {}",
                other
            ))),
        }
    }
}

/// Which votes count toward quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumCounting {
    #[default]
    ForOnly,
    ForAndAbstain,
}

impl QuorumCounting {
    pub fn counted(&self, proposal: &Proposal) -> Amount {
        match self {
            QuorumCounting::ForOnly => proposal.for_votes,
            QuorumCounting::ForAndAbstain => {
                proposal.for_votes.saturating_add(proposal.abstain_votes)
            }
        }
    }
}

/// A voter's ballot on one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Receipt {
    pub has_voted: bool,
    pub support: VoteSupport,
    pub votes: Amount,
}

/// The four parallel arrays of a proposal's actions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposalActions {
    pub targets: Vec<Address>,
    pub values: Vec<Amount>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Vec<u8>>,
}

impl ProposalActions {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Zip the arrays into actions, checking they line up and that there are
    /// between 1 and `max` of them.
    pub fn into_actions(self, max: usize) -> Result<Vec<Action>> {
        let n = self.targets.len();
        if self.values.len() != n || self.signatures.len() != n || self.calldatas.len() != n {
            return Err(GovernanceError::ArityMismatch(format!(
                "{} targets, {} values, {} signatures, {} calldatas",
                n,
                self.values.len(),
                self.signatures.len(),
                self.calldatas.len()
            )));
        }
        if n == 0 {
            return Err(GovernanceError::ArityMismatch("must provide actions".to_string()));
        }
        if n > max {
            return Err(GovernanceError::ArityMismatch(format!(
                "too many actions: {} > {}",
                n, max
            )));
        }

        Ok(self
            .targets
            .into_iter()
            .zip(self.values)
            .zip(self.signatures)
            .zip(self.calldatas)
            .map(|(((target, value), signature), data)| Action::new(target, value, signature, data))
            .collect())
    }
}

impl FromIterator<Action> for ProposalActions {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut out = ProposalActions::default();
        for action in iter {
            out.targets.push(action.target);
            out.values.push(action.value);
            out.signatures.push(action.signature);
            out.calldatas.push(action.data);
        }
        out
    }
}

/// On-chain proposal.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub id: u64,
    pub proposer: Address,
    pub actions: Vec<Action>,
    pub description: String,
    /// Snapshot block for voting power and quorum
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    /// Timelock eta, 0 until queued
    pub eta: Timestamp,
    pub for_votes: Amount,
    pub against_votes: Amount,
    pub abstain_votes: Amount,
    pub canceled: bool,
    pub executed: bool,
    receipts: HashMap<Address, Receipt>,
}

impl Proposal {
    pub fn new(
        id: u64,
        proposer: Address,
        actions: Vec<Action>,
        description: String,
        start_block: BlockNumber,
        end_block: BlockNumber,
    ) -> Self {
        Self {
            id,
            proposer,
            actions,
            description,
            start_block,
            end_block,
            eta: 0,
            for_votes: 0,
            against_votes: 0,
            abstain_votes: 0,
            canceled: false,
            executed: false,
            receipts: HashMap::new(),
        }
    }

    /// Derive the current state.
    ///
    /// `quorum` is only consulted once voting has ended, when the snapshot
    /// block is guaranteed to be in the past. `grace_period` is the
    /// timelock's execution window.
    pub fn state<F>(
        &self,
        env: &BlockEnv,
        counting: QuorumCounting,
        grace_period: u64,
        quorum: F,
    ) -> Result<ProposalState>
    where
        F: FnOnce(BlockNumber) -> Result<Amount>,
    {
        if self.canceled {
            return Ok(ProposalState::Canceled);
        }
        if self.executed {
            return Ok(ProposalState::Executed);
        }
        if env.number <= self.start_block {
            return Ok(ProposalState::Pending);
        }
        if env.number <= self.end_block {
            return Ok(ProposalState::Active);
        }
        if self.for_votes <= self.against_votes
            || counting.counted(self) < quorum(self.start_block)?
        {
            return Ok(ProposalState::Defeated);
        }
        if self.eta == 0 {
            return Ok(ProposalState::Succeeded);
        }
        if env.timestamp > self.eta.saturating_add(grace_period) {
            return Ok(ProposalState::Expired);
        }
        Ok(ProposalState::Queued)
    }

    /// Record a ballot. The receipt is written once and never changes.
    pub fn record_vote(&mut self, voter: Address, support: VoteSupport, votes: Amount) -> Result<()> {
        if self.has_voted(&voter) {
            return Err(GovernanceError::AlreadyVoted {
                proposal_id: self.id,
                voter,
            });
        }

        let tally = match support {
            VoteSupport::For => &mut self.for_votes,
            VoteSupport::Against => &mut self.against_votes,
            VoteSupport::Abstain => &mut self.abstain_votes,
        };
        *tally = tally.checked_add(votes).ok_or(GovernanceError::VotesOverflow)?;

        self.receipts.insert(
            voter,
            Receipt {
                has_voted: true,
                support,
                votes,
            },
        );
        Ok(())
    }

    pub fn has_voted(&self, voter: &Address) -> bool {
        self.receipts.get(voter).map(|r| r.has_voted).unwrap_or(false)
    }

    /// Receipt for `voter`; an empty receipt if they never voted.
    pub fn receipt(&self, voter: &Address) -> Receipt {
        self.receipts.get(voter).copied().unwrap_or_default()
    }

    pub fn receipts(&self) -> impl Iterator<Item = (&Address, &Receipt)> {
        self.receipts.iter()
    }

    pub fn total_votes(&self) -> Amount {
        self.for_votes
            .saturating_add(self.against_votes)
            .saturating_add(self.abstain_votes)
    }

    pub fn get_actions(&self) -> ProposalActions {
        self.actions.iter().cloned().collect()
    }
}

/// Arena of proposals indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ProposalRegistry {
    proposals: BTreeMap<u64, Proposal>,
    count: u64,
    latest: HashMap<Address, u64>,
}

impl ProposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new proposal and return its id. Ids start at 1.
    pub fn create(
        &mut self,
        proposer: Address,
        actions: Vec<Action>,
        description: String,
        start_block: BlockNumber,
        end_block: BlockNumber,
    ) -> u64 {
        self.count += 1;
        let id = self.count;
        self.proposals.insert(
            id,
            Proposal::new(id, proposer, actions, description, start_block, end_block),
        );
        self.latest.insert(proposer, id);
        id
    }

    pub fn get(&self, id: u64) -> Result<&Proposal> {
        self.proposals.get(&id).ok_or(GovernanceError::ProposalNotFound(id))
    }

    pub fn get_mut(&mut self, id: u64) -> Result<&mut Proposal> {
        self.proposals.get_mut(&id).ok_or(GovernanceError::ProposalNotFound(id))
    }

    /// Number of proposals ever created.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Most recent proposal by `proposer`, if any.
    pub fn latest_for(&self, proposer: &Address) -> Option<u64> {
        self.latest.get(proposer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: u64 = 100;

    fn proposal() -> Proposal {
        let action = Action::new(Address::from_label("target"), 0, "ping()", vec![]);
        Proposal::new(1, Address::from_label("alice"), vec![action], "test".into(), 10, 20)
    }

    fn state_at(p: &Proposal, block: u64, time: u64, quorum: Amount) -> ProposalState {
        let env = BlockEnv::new(1, block, time);
        p.state(&env, QuorumCounting::ForOnly, GRACE, |_| Ok(quorum)).unwrap()
    }

    #[test]
    fn test_voting_window() {
        let p = proposal();
        assert_eq!(state_at(&p, 5, 0, 0), ProposalState::Pending);
        assert_eq!(state_at(&p, 10, 0, 0), ProposalState::Pending);
        assert_eq!(state_at(&p, 11, 0, 0), ProposalState::Active);
        assert_eq!(state_at(&p, 20, 0, 0), ProposalState::Active);
        assert_eq!(state_at(&p, 21, 0, 0), ProposalState::Defeated);
    }

    #[test]
    fn test_outcome_rules() {
        let mut p = proposal();
        p.record_vote(Address::from_label("a"), VoteSupport::For, 50).unwrap();
        p.record_vote(Address::from_label("b"), VoteSupport::Against, 50).unwrap();
        // Tie is a defeat.
        assert_eq!(state_at(&p, 21, 0, 0), ProposalState::Defeated);

        p.record_vote(Address::from_label("c"), VoteSupport::For, 1).unwrap();
        assert_eq!(state_at(&p, 21, 0, 51), ProposalState::Succeeded);
        assert_eq!(state_at(&p, 21, 0, 52), ProposalState::Defeated);
    }

    #[test]
    fn test_queued_and_expired() {
        let mut p = proposal();
        p.record_vote(Address::from_label("a"), VoteSupport::For, 10).unwrap();
        p.eta = 1_000;

        assert_eq!(state_at(&p, 30, 999, 1), ProposalState::Queued);
        assert_eq!(state_at(&p, 30, 1_000 + GRACE, 1), ProposalState::Queued);
        assert_eq!(state_at(&p, 30, 1_001 + GRACE, 1), ProposalState::Expired);
    }

    #[test]
    fn test_terminal_flags_win() {
        let mut p = proposal();
        p.canceled = true;
        assert_eq!(state_at(&p, 15, 0, 0), ProposalState::Canceled);

        let mut p = proposal();
        p.executed = true;
        p.eta = 1;
        assert_eq!(state_at(&p, 5, 10_000, 0), ProposalState::Executed);
    }

    #[test]
    fn test_quorum_not_consulted_while_voting() {
        let p = proposal();
        let env = BlockEnv::new(1, 15, 0);
        let state = p
            .state(&env, QuorumCounting::ForOnly, GRACE, |_| {
                Err(GovernanceError::NotYetDetermined { block: 10, current: 15 })
            })
            .unwrap();
        assert_eq!(state, ProposalState::Active);
    }

    #[test]
    fn test_abstain_counting() {
        let mut p = proposal();
        p.record_vote(Address::from_label("a"), VoteSupport::For, 10).unwrap();
        p.record_vote(Address::from_label("b"), VoteSupport::Abstain, 10).unwrap();

        assert_eq!(QuorumCounting::ForOnly.counted(&p), 10);
        assert_eq!(QuorumCounting::ForAndAbstain.counted(&p), 20);
    }

    #[test]
    fn test_double_vote_rejected() {
        let mut p = proposal();
        let voter = Address::from_label("a");
        p.record_vote(voter, VoteSupport::For, 10).unwrap();

        let err = p.record_vote(voter, VoteSupport::Against, 10).unwrap_err();
        assert!(matches!(err, GovernanceError::AlreadyVoted { proposal_id: 1, .. }));
        assert_eq!(p.against_votes, 0);
        assert_eq!(
            p.receipt(&voter),
            Receipt { has_voted: true, support: VoteSupport::For, votes: 10 }
        );
        assert!(!p.receipt(&Address::from_label("z")).has_voted);
    }

    #[test]
    fn test_action_arity() {
        let ok = ProposalActions {
            targets: vec![Address::from_label("t")],
            values: vec![0],
            signatures: vec!["ping()".into()],
            calldatas: vec![vec![]],
        };
        assert_eq!(ok.clone().into_actions(10).unwrap().len(), 1);

        let mut bad = ok.clone();
        bad.values.push(1);
        assert!(matches!(bad.into_actions(10), Err(GovernanceError::ArityMismatch(_))));

        assert!(matches!(
            ProposalActions::default().into_actions(10),
            Err(GovernanceError::ArityMismatch(_))
        ));

        let many: ProposalActions = (0..11)
            .map(|_| Action::new(Address::from_label("t"), 0, "", vec![]))
            .collect();
        assert!(matches!(many.into_actions(10), Err(GovernanceError::ArityMismatch(_))));
    }

    #[test]
    fn test_registry_ids_and_latest() {
        let mut registry = ProposalRegistry::new();
        let alice = Address::from_label("alice");
        assert_eq!(registry.create(alice, vec![], "a".into(), 1, 2), 1);
        assert_eq!(registry.create(alice, vec![], "b".into(), 1, 2), 2);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.latest_for(&alice), Some(2));
        assert!(matches!(registry.get(3), Err(GovernanceError::ProposalNotFound(3))));
    }

    #[test]
    fn test_vote_support_conversions() {
        assert_eq!(VoteSupport::from(true), VoteSupport::For);
        assert_eq!(VoteSupport::try_from(2).unwrap(), VoteSupport::Abstain);
        assert!(VoteSupport::try_from(3).is_err());
        assert_eq!(VoteSupport::Abstain.as_u8(), 2);
    }
}
