//! Proposal engine: proposal creation, voting, and execution through the
//! timelock.
//!
//! The engine is expected to be the timelock's admin. Voting power always
//! comes from a [`VotingPower`] view, so the same engine works over a single
//! ledger or the multi-token aggregate.

use agora_crypto::{recover_signer, Domain, SignedMessage};
use agora_types::{Address, Amount, BlockNumber, Hash, Timestamp};
use serde::{Deserialize, Serialize};

use crate::action::{Action, Host, Invocation};
use crate::checkpoint::CheckpointHistory;
use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};
use crate::events::{EventLog, GovernanceEvent};
use crate::ledger::VotingPower;
use crate::proposal::{
    Proposal, ProposalActions, ProposalRegistry, ProposalState, QuorumCounting, Receipt,
    VoteSupport,
};
use crate::timelock::{TimelockQueue, GRACE_PERIOD, SET_PENDING_ADMIN};

/// Maximum number of actions in one proposal.
pub const MAX_OPERATIONS: usize = 10;

pub const QUORUM_DENOMINATOR: u64 = 100;

/// Type tag of a signed ballot.
pub const BALLOT_TYPE: &str = "Ballot(u64 proposalId,u8 support)";

pub const SET_VOTING_DELAY: &str = "setVotingDelay(u64)";
pub const SET_VOTING_PERIOD: &str = "setVotingPeriod(u64)";
pub const SET_PROPOSAL_THRESHOLD: &str = "setProposalThreshold(u128)";
pub const UPDATE_QUORUM_NUMERATOR: &str = "updateQuorumNumerator(u64)";
pub const UPDATE_TIMELOCK: &str = "updateTimelock(address)";

/// Canonical bytes of a ballot authorization.
pub fn ballot_message(proposal_id: u64, support: VoteSupport) -> Result<Vec<u8>> {
    borsh::to_vec(&(proposal_id, support.as_u8()))
        .map_err(|e| GovernanceError::InvalidCalldata(e.to_string()))
}

/// Voting parameters. All of them can later be changed by governance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceSettings {
    /// Blocks between proposal creation and the snapshot block
    pub voting_delay: u64,
    /// Blocks the vote stays open after the snapshot block
    pub voting_period: u64,
    /// Current votes needed to propose
    pub proposal_threshold: Amount,
    /// Percent of the snapshotted supply that must vote for
    pub quorum_numerator: u64,
    pub quorum_counting: QuorumCounting,
}

impl GovernanceSettings {
    pub fn validate(&self) -> Result<()> {
        check_voting_period(self.voting_period)?;
        check_quorum_numerator(self.quorum_numerator)
    }
}

fn check_voting_period(period: u64) -> Result<()> {
    if period == 0 {
        return Err(GovernanceError::InvalidParameter("voting period too low".into()));
    }
    Ok(())
}

fn check_quorum_numerator(numerator: u64) -> Result<()> {
    if numerator > QUORUM_DENOMINATOR {
        return Err(GovernanceError::InvalidParameter(format!(
            "quorum numerator {} over denominator {}",
            numerator, QUORUM_DENOMINATOR
        )));
    }
    Ok(())
}

/// `amount * numerator / 100` without overflowing, for `numerator <= 100`.
fn percent_of(amount: Amount, numerator: u64) -> Amount {
    let n = Amount::from(numerator);
    let d = Amount::from(QUORUM_DENOMINATOR);
    (amount / d) * n + (amount % d) * n / d
}

/// Everything governance can change about the engine.
#[derive(Debug, Clone)]
struct Parameters {
    settings: GovernanceSettings,
    quorum_numerators: CheckpointHistory,
    /// Executor: the only caller allowed to change parameters
    timelock: Address,
}

impl Parameters {
    fn quorum_numerator_at(&self, block: BlockNumber) -> u64 {
        // Numerators are never above 100.
        self.quorum_numerators.at(block) as u64
    }

    fn set_voting_delay(&mut self, delay: u64, env: &BlockEnv, log: &mut EventLog) {
        let old = std::mem::replace(&mut self.settings.voting_delay, delay);
        tracing::info!(old, new = delay, "Voting delay set");
        log.emit(env.number, GovernanceEvent::VotingDelaySet { old, new: delay });
    }

    fn set_voting_period(&mut self, period: u64, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        check_voting_period(period)?;
        let old = std::mem::replace(&mut self.settings.voting_period, period);
        tracing::info!(old, new = period, "Voting period set");
        log.emit(env.number, GovernanceEvent::VotingPeriodSet { old, new: period });
        Ok(())
    }

    fn set_proposal_threshold(&mut self, threshold: Amount, env: &BlockEnv, log: &mut EventLog) {
        let old = std::mem::replace(&mut self.settings.proposal_threshold, threshold);
        tracing::info!(%old, new = %threshold, "Proposal threshold set");
        log.emit(env.number, GovernanceEvent::ProposalThresholdSet { old, new: threshold });
    }

    fn update_quorum_numerator(&mut self, numerator: u64, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        check_quorum_numerator(numerator)?;
        let old = std::mem::replace(&mut self.settings.quorum_numerator, numerator);
        self.quorum_numerators.write(env.number, Amount::from(numerator));
        tracing::info!(old, new = numerator, "Quorum numerator updated");
        log.emit(env.number, GovernanceEvent::QuorumNumeratorUpdated { old, new: numerator });
        Ok(())
    }

    fn update_timelock(&mut self, timelock: Address, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        if timelock.is_zero() {
            return Err(GovernanceError::InvalidParameter("timelock is the zero address".into()));
        }
        let old = std::mem::replace(&mut self.timelock, timelock);
        tracing::info!(%old, new = %timelock, "Timelock changed");
        log.emit(env.number, GovernanceEvent::TimelockChange { old, new: timelock });
        Ok(())
    }

    fn dispatch(&mut self, invocation: &Invocation, env: &BlockEnv, log: &mut EventLog) -> Result<Vec<u8>> {
        if invocation.is(SET_VOTING_DELAY) {
            self.set_voting_delay(invocation.decode()?, env, log);
        } else if invocation.is(SET_VOTING_PERIOD) {
            self.set_voting_period(invocation.decode()?, env, log)?;
        } else if invocation.is(SET_PROPOSAL_THRESHOLD) {
            self.set_proposal_threshold(invocation.decode()?, env, log);
        } else if invocation.is(UPDATE_QUORUM_NUMERATOR) {
            self.update_quorum_numerator(invocation.decode()?, env, log)?;
        } else if invocation.is(UPDATE_TIMELOCK) {
            self.update_timelock(invocation.decode()?, env, log)?;
        } else {
            return Err(invocation.unknown_selector());
        }
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct ProposalEngine {
    address: Address,
    name: String,
    guardian: Address,
    params: Parameters,
    proposals: ProposalRegistry,
    domain_separator: Hash,
}

impl ProposalEngine {
    pub fn new(
        name: impl Into<String>,
        address: Address,
        timelock: Address,
        guardian: Address,
        settings: GovernanceSettings,
        env: &BlockEnv,
    ) -> Result<Self> {
        settings.validate()?;
        let name = name.into();
        let domain_separator = Domain::new(name.clone(), env.chain_id, address).separator()?;

        let mut quorum_numerators = CheckpointHistory::new();
        quorum_numerators.write(env.number, Amount::from(settings.quorum_numerator));

        Ok(Self {
            address,
            name,
            guardian,
            params: Parameters {
                settings,
                quorum_numerators,
                timelock,
            },
            proposals: ProposalRegistry::new(),
            domain_separator,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the timelock that executes proposals.
    pub fn timelock(&self) -> Address {
        self.params.timelock
    }

    /// Zero after the guardian abdicated.
    pub fn guardian(&self) -> Address {
        self.guardian
    }

    pub fn settings(&self) -> &GovernanceSettings {
        &self.params.settings
    }

    pub fn domain_separator(&self) -> Hash {
        self.domain_separator
    }

    pub fn proposal_count(&self) -> u64 {
        self.proposals.count()
    }

    pub fn latest_proposal_id(&self, proposer: &Address) -> Option<u64> {
        self.proposals.latest_for(proposer)
    }

    pub fn proposal(&self, id: u64) -> Result<&Proposal> {
        self.proposals.get(id)
    }

    pub fn get_actions(&self, id: u64) -> Result<ProposalActions> {
        Ok(self.proposals.get(id)?.get_actions())
    }

    pub fn get_receipt(&self, id: u64, voter: &Address) -> Result<Receipt> {
        Ok(self.proposals.get(id)?.receipt(voter))
    }

    pub fn quorum_numerator_at(&self, block: BlockNumber) -> u64 {
        self.params.quorum_numerator_at(block)
    }

    /// Minimum counted votes for a proposal snapshotted at `block`.
    pub fn quorum(&self, block: BlockNumber, power: &dyn VotingPower, env: &BlockEnv) -> Result<Amount> {
        let supply = power.prior_total_supply(block, env)?;
        Ok(percent_of(supply, self.params.quorum_numerator_at(block)))
    }

    pub fn state(&self, id: u64, power: &dyn VotingPower, env: &BlockEnv) -> Result<ProposalState> {
        let proposal = self.proposals.get(id)?;
        proposal.state(env, self.params.settings.quorum_counting, GRACE_PERIOD, |block| {
            self.quorum(block, power, env)
        })
    }

    pub fn propose(
        &mut self,
        proposer: Address,
        actions: ProposalActions,
        description: impl Into<String>,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<u64> {
        let actions = actions.into_actions(MAX_OPERATIONS)?;

        let settings = self.params.settings;
        let votes = power.current_votes(&proposer);
        if votes < settings.proposal_threshold {
            return Err(GovernanceError::ThresholdNotMet {
                votes,
                threshold: settings.proposal_threshold,
            });
        }

        if let Some(latest) = self.proposals.latest_for(&proposer) {
            let state = self.state(latest, power, env)?;
            if state.is_live() {
                return Err(GovernanceError::ProposerHasLiveProposal {
                    proposal_id: latest,
                    state,
                });
            }
        }

        let start_block = env.number.saturating_add(settings.voting_delay);
        let end_block = start_block.saturating_add(settings.voting_period);
        let description = description.into();
        let summary: ProposalActions = actions.iter().cloned().collect();
        let id = self
            .proposals
            .create(proposer, actions, description.clone(), start_block, end_block);

        tracing::info!(id, %proposer, start_block, end_block, "Proposal created");
        log.emit(
            env.number,
            GovernanceEvent::ProposalCreated {
                id,
                proposer,
                targets: summary.targets,
                values: summary.values,
                signatures: summary.signatures,
                calldatas: summary.calldatas,
                start_block,
                end_block,
                description,
            },
        );
        Ok(id)
    }

    pub fn cast_vote(
        &mut self,
        voter: Address,
        id: u64,
        support: VoteSupport,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Amount> {
        self.record_vote(voter, id, support, None, power, env, log)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cast_vote_with_reason(
        &mut self,
        voter: Address,
        id: u64,
        support: VoteSupport,
        reason: impl Into<String>,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Amount> {
        self.record_vote(voter, id, support, Some(reason.into()), power, env, log)
    }

    /// Vote on behalf of whoever signed the ballot. Returns the signer.
    pub fn cast_vote_by_sig(
        &mut self,
        id: u64,
        support: VoteSupport,
        signed: &SignedMessage,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Address> {
        let message = ballot_message(id, support)?;
        let voter = recover_signer(&self.domain_separator, BALLOT_TYPE, &message, signed)
            .ok_or_else(|| GovernanceError::InvalidSignature("ballot signer mismatch".into()))?;
        self.record_vote(voter, id, support, None, power, env, log)?;
        Ok(voter)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_vote(
        &mut self,
        voter: Address,
        id: u64,
        support: VoteSupport,
        reason: Option<String>,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Amount> {
        let state = self.state(id, power, env)?;
        if !state.can_vote() {
            return Err(GovernanceError::VotingClosed { proposal_id: id, state });
        }

        let proposal = self.proposals.get_mut(id)?;
        if proposal.has_voted(&voter) {
            return Err(GovernanceError::AlreadyVoted { proposal_id: id, voter });
        }
        let votes = power.prior_votes(&voter, proposal.start_block, env)?;
        proposal.record_vote(voter, support, votes)?;

        tracing::debug!(id, %voter, ?support, %votes, "Vote cast");
        log.emit(
            env.number,
            GovernanceEvent::VoteCast {
                voter,
                proposal_id: id,
                support,
                votes,
                reason,
            },
        );
        Ok(votes)
    }

    /// Queue every action of a succeeded proposal. Either all actions are
    /// queued or none is.
    pub fn queue(
        &mut self,
        id: u64,
        timelock: &mut TimelockQueue,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Timestamp> {
        self.require_state(id, ProposalState::Succeeded, "queue", power, env)?;

        let eta = env.timestamp.saturating_add(timelock.delay());
        let actions = self.proposals.get(id)?.actions.clone();

        let mut hashes: Vec<Hash> = Vec::with_capacity(actions.len());
        for action in &actions {
            let hash = action.tx_hash(eta)?;
            if timelock.is_queued(&hash) || hashes.contains(&hash) {
                return Err(GovernanceError::ActionAlreadyQueued { proposal_id: id, hash });
            }
            hashes.push(hash);
        }
        for action in &actions {
            timelock.queue_transaction(self.address, action, eta, env, log)?;
        }

        self.proposals.get_mut(id)?.eta = eta;
        tracing::info!(id, eta, "Proposal queued");
        log.emit(env.number, GovernanceEvent::ProposalQueued { id, eta });
        Ok(eta)
    }

    /// Execute every action of a queued proposal through the timelock.
    ///
    /// While the actions run, calls into the engine are only accepted from
    /// the timelock and only for the governance settings; anything else is a
    /// re-entrancy error.
    pub fn execute(
        &mut self,
        id: u64,
        timelock: &mut TimelockQueue,
        power: &dyn VotingPower,
        host: &mut dyn Host,
    ) -> Result<()> {
        let env = *host.env();
        self.require_state(id, ProposalState::Queued, "execute", power, &env)?;

        let (actions, eta) = {
            let proposal = self.proposals.get(id)?;
            (proposal.actions.clone(), proposal.eta)
        };

        let mut guarded = ExecutionHost {
            engine: self.address,
            params: &mut self.params,
            inner: &mut *host,
        };
        for action in &actions {
            timelock.execute_transaction(self.address, action, eta, &mut guarded)?;
        }

        self.proposals.get_mut(id)?.executed = true;
        tracing::info!(id, "Proposal executed");
        host.emit(GovernanceEvent::ProposalExecuted { id });
        Ok(())
    }

    /// Cancel a proposal that has not been executed.
    ///
    /// The guardian may always cancel; the proposer only once their current
    /// votes have dropped below the threshold.
    pub fn cancel(
        &mut self,
        caller: Address,
        id: u64,
        timelock: &mut TimelockQueue,
        power: &dyn VotingPower,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        let state = self.state(id, power, env)?;
        if matches!(state, ProposalState::Executed | ProposalState::Canceled) {
            return Err(GovernanceError::InvalidProposalState {
                proposal_id: id,
                state,
                operation: "cancel",
            });
        }

        let proposal = self.proposals.get(id)?;
        if caller != self.guardian || self.guardian.is_zero() {
            if caller != proposal.proposer {
                return Err(GovernanceError::Unauthorized(format!(
                    "{:x} is neither guardian nor proposer",
                    caller
                )));
            }
            let votes = power.current_votes(&proposal.proposer);
            if votes >= self.params.settings.proposal_threshold {
                return Err(GovernanceError::Unauthorized(format!(
                    "proposer votes {} not below threshold",
                    votes
                )));
            }
        }

        let (actions, eta) = (proposal.actions.clone(), proposal.eta);
        if eta != 0 {
            for action in &actions {
                timelock.cancel_transaction(self.address, action, eta, env, log)?;
            }
        }

        self.proposals.get_mut(id)?.canceled = true;
        tracing::info!(id, %caller, "Proposal canceled");
        log.emit(env.number, GovernanceEvent::ProposalCanceled { id });
        Ok(())
    }

    /// Complete a timelock admin handoff to this engine.
    pub fn accept_admin(
        &self,
        caller: Address,
        timelock: &mut TimelockQueue,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        self.only_guardian(caller)?;
        timelock.accept_admin(self.address, env, log)
    }

    /// The guardian gives up its role for good.
    pub fn abdicate(&mut self, caller: Address, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        self.only_guardian(caller)?;
        self.guardian = Address::ZERO;

        tracing::info!(guardian = %caller, "Guardian abdicated");
        log.emit(env.number, GovernanceEvent::GuardianAbdicated { guardian: caller });
        Ok(())
    }

    /// Guardian queues `setPendingAdmin(pending_admin)` on the timelock.
    pub fn queue_set_timelock_pending_admin(
        &self,
        caller: Address,
        pending_admin: Address,
        eta: Timestamp,
        timelock: &mut TimelockQueue,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Hash> {
        self.only_guardian(caller)?;
        let action = Action::call(timelock.address(), SET_PENDING_ADMIN, &pending_admin)?;
        timelock.queue_transaction(self.address, &action, eta, env, log)
    }

    /// Guardian executes a `setPendingAdmin` queued with
    /// [`queue_set_timelock_pending_admin`](Self::queue_set_timelock_pending_admin).
    pub fn execute_set_timelock_pending_admin(
        &self,
        caller: Address,
        pending_admin: Address,
        eta: Timestamp,
        timelock: &mut TimelockQueue,
        host: &mut dyn Host,
    ) -> Result<()> {
        self.only_guardian(caller)?;
        let action = Action::call(timelock.address(), SET_PENDING_ADMIN, &pending_admin)?;
        timelock.execute_transaction(self.address, &action, eta, host)?;
        Ok(())
    }

    /// Blocks between proposing and the snapshot. Governance only.
    pub fn set_voting_delay(&mut self, caller: Address, delay: u64, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        self.only_governance(caller)?;
        self.params.set_voting_delay(delay, env, log);
        Ok(())
    }

    /// Length of the voting window in blocks. Must be non-zero.
    pub fn set_voting_period(&mut self, caller: Address, period: u64, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        self.only_governance(caller)?;
        self.params.set_voting_period(period, env, log)
    }

    /// Current votes needed to propose. Governance only.
    pub fn set_proposal_threshold(
        &mut self,
        caller: Address,
        threshold: Amount,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        self.only_governance(caller)?;
        self.params.set_proposal_threshold(threshold, env, log);
        Ok(())
    }

    /// Checkpoint a new quorum numerator; past snapshots keep the old one.
    pub fn update_quorum_numerator(
        &mut self,
        caller: Address,
        numerator: u64,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        self.only_governance(caller)?;
        self.params.update_quorum_numerator(numerator, env, log)
    }

    /// Hand execution to another timelock. From then on only `timelock`
    /// passes the governance check.
    pub fn update_timelock(
        &mut self,
        caller: Address,
        timelock: Address,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        self.only_governance(caller)?;
        self.params.update_timelock(timelock, env, log)
    }

    /// Handle a call addressed to the engine from outside a proposal run.
    pub(crate) fn dispatch(&mut self, invocation: &Invocation, env: &BlockEnv, log: &mut EventLog) -> Result<Vec<u8>> {
        self.only_governance(invocation.caller)?;
        self.params.dispatch(invocation, env, log)
    }

    fn require_state(
        &self,
        id: u64,
        expected: ProposalState,
        operation: &'static str,
        power: &dyn VotingPower,
        env: &BlockEnv,
    ) -> Result<()> {
        let state = self.state(id, power, env)?;
        if state != expected {
            return Err(GovernanceError::InvalidProposalState {
                proposal_id: id,
                state,
                operation,
            });
        }
        Ok(())
    }

    fn only_guardian(&self, caller: Address) -> Result<()> {
        if self.guardian.is_zero() || caller != self.guardian {
            return Err(GovernanceError::NotGuardian(caller));
        }
        Ok(())
    }

    fn only_governance(&self, caller: Address) -> Result<()> {
        if caller != self.params.timelock {
            return Err(GovernanceError::NotGovernance(caller));
        }
        Ok(())
    }
}

/// Host seen by the timelock while a proposal executes.
struct ExecutionHost<'a> {
    engine: Address,
    params: &'a mut Parameters,
    inner: &'a mut dyn Host,
}

impl Host for ExecutionHost<'_> {
    fn env(&self) -> &BlockEnv {
        self.inner.env()
    }

    fn emit(&mut self, event: GovernanceEvent) {
        self.inner.emit(event)
    }

    fn call(&mut self, invocation: Invocation) -> Result<Vec<u8>> {
        if invocation.target != self.engine {
            return self.inner.call(invocation);
        }
        if invocation.caller != self.params.timelock {
            return Err(GovernanceError::Reentrancy(format!(
                "{:x} called the engine during execution",
                invocation.caller
            )));
        }

        let env = *self.inner.env();
        let mut events = EventLog::new();
        let result = self.params.dispatch(&invocation, &env, &mut events);
        events.into_events().for_each(|e| self.inner.emit(e));
        result
    }
}
