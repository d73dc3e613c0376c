//! Transaction host for a complete governance deployment.
//!
//! [`GovernanceRuntime`] owns the block environment, the token ledgers, the
//! aggregator, the timelock, the engine and the governed call targets. Every
//! operation runs as one transaction: if it fails, the whole runtime is put
//! back the way it was before the call, including target state and events.
//!
//! Further timelocks can be deployed next to the active one. When governance
//! points the engine at one of them (`updateTimelock`), it becomes the
//! active timelock as soon as the transaction that made the change succeeds.

use std::collections::BTreeMap;

use agora_crypto::SignedMessage;
use agora_types::{Address, Amount, BlockNumber, Hash, Timestamp};

use crate::action::{Action, CallTarget, Host, Invocation, TargetRegistry};
use crate::aggregator::{AggregateVotes, VotingPowerAggregator};
use crate::config::GovernanceConfig;
use crate::engine::ProposalEngine;
use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};
use crate::events::{EventLog, GovernanceEvent};
use crate::ledger::{TokenLedgers, VotingLedger, VotingPower};
use crate::proposal::{Proposal, ProposalActions, ProposalState, Receipt, VoteSupport};
use crate::reentrancy::CallStack;
use crate::timelock::TimelockQueue;

pub const ENGINE_LABEL: &str = "engine";
pub const TIMELOCK_LABEL: &str = "timelock";
pub const AGGREGATOR_LABEL: &str = "aggregator";

#[derive(Debug)]
pub struct GovernanceRuntime {
    env: BlockEnv,
    ledgers: TokenLedgers,
    aggregator: VotingPowerAggregator,
    /// The timelock the engine currently executes through
    timelock: TimelockQueue,
    /// Deployed timelocks the engine is not using
    standby: BTreeMap<Address, TimelockQueue>,
    engine: ProposalEngine,
    targets: TargetRegistry,
    log: EventLog,
}

/// Component state copied before a transaction. The event log is not part
/// of it: a failed transaction truncates the log instead.
struct Snapshot {
    env: BlockEnv,
    ledgers: TokenLedgers,
    aggregator: VotingPowerAggregator,
    timelock: TimelockQueue,
    standby: BTreeMap<Address, TimelockQueue>,
    engine: ProposalEngine,
    targets: TargetRegistry,
}

impl GovernanceRuntime {
    pub fn new(config: &GovernanceConfig) -> Result<Self> {
        Self::with_env(config, BlockEnv::new(config.chain_id, 1, 0))
    }

    /// Deploy at a given block. The engine becomes the timelock admin, and
    /// the timelock the only account allowed to change governance settings.
    pub fn with_env(config: &GovernanceConfig, env: BlockEnv) -> Result<Self> {
        config.validate()?;

        let engine_address = Address::from_label(ENGINE_LABEL);
        let timelock_address = Address::from_label(TIMELOCK_LABEL);
        let aggregator_address = Address::from_label(AGGREGATOR_LABEL);

        let mut ledgers = TokenLedgers::new();
        ledgers.insert(
            config.primary_token,
            VotingLedger::new(config.token_name.clone(), config.primary_token, env.chain_id)?,
        );
        for (i, token) in config.supported_tokens.iter().enumerate() {
            let name = format!("{} #{}", config.token_name, i + 1);
            ledgers.insert(*token, VotingLedger::new(name, *token, env.chain_id)?);
        }

        let aggregator = VotingPowerAggregator::new(
            aggregator_address,
            config.primary_token,
            timelock_address,
            config.supported_tokens.clone(),
            &env,
        )?;
        let timelock = TimelockQueue::new(timelock_address, engine_address, config.timelock_delay)?;
        let engine = ProposalEngine::new(
            config.name.clone(),
            engine_address,
            timelock_address,
            config.guardian,
            config.settings(),
            &env,
        )?;

        tracing::info!(
            name = %config.name,
            engine = %engine_address,
            timelock = %timelock_address,
            block = env.number,
            "Governance deployed"
        );

        Ok(Self {
            env,
            ledgers,
            aggregator,
            timelock,
            standby: BTreeMap::new(),
            engine,
            targets: TargetRegistry::new(),
            log: EventLog::new(),
        })
    }

    /// Run `op` atomically.
    fn transact<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.snapshot();
        let events = self.log.len();
        match op(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!(error = %e, block = self.env.number, "Transaction reverted");
                self.restore(snapshot);
                self.log.truncate(events);
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            env: self.env,
            ledgers: self.ledgers.clone(),
            aggregator: self.aggregator.clone(),
            timelock: self.timelock.clone(),
            standby: self.standby.clone(),
            engine: self.engine.clone(),
            targets: self.targets.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        let Snapshot {
            env,
            ledgers,
            aggregator,
            timelock,
            standby,
            engine,
            targets,
        } = snapshot;
        self.env = env;
        self.ledgers = ledgers;
        self.aggregator = aggregator;
        self.timelock = timelock;
        self.standby = standby;
        self.engine = engine;
        self.targets = targets;
    }

    /// Make the timelock the engine now points at the active one.
    fn switch_timelock(&mut self) -> Result<()> {
        let current = self.engine.timelock();
        if current == self.timelock.address() {
            return Ok(());
        }
        let next = self
            .standby
            .remove(&current)
            .ok_or(GovernanceError::UnknownTarget(current))?;
        let previous = std::mem::replace(&mut self.timelock, next);
        tracing::info!(old = %previous.address(), new = %current, "Active timelock switched");
        self.standby.insert(previous.address(), previous);
        self.aggregator.set_executor(current);
        Ok(())
    }

    // Chain environment

    pub fn env(&self) -> &BlockEnv {
        &self.env
    }

    pub fn block_number(&self) -> BlockNumber {
        self.env.number
    }

    pub fn timestamp(&self) -> Timestamp {
        self.env.timestamp
    }

    pub fn mine_blocks(&mut self, blocks: u64) {
        self.env.mine(blocks);
    }

    pub fn increase_time(&mut self, seconds: u64) {
        self.env.increase_time(seconds);
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.env.set_timestamp(timestamp);
    }

    pub fn events(&self) -> &EventLog {
        &self.log
    }

    // Components

    pub fn engine(&self) -> &ProposalEngine {
        &self.engine
    }

    pub fn timelock(&self) -> &TimelockQueue {
        &self.timelock
    }

    /// A deployed timelock the engine is not currently using.
    pub fn standby_timelock(&self, address: &Address) -> Option<&TimelockQueue> {
        self.standby.get(address)
    }

    pub fn aggregator(&self) -> &VotingPowerAggregator {
        &self.aggregator
    }

    pub fn primary_token(&self) -> Address {
        self.aggregator.primary()
    }

    pub fn ledger(&self, token: &Address) -> Result<&VotingLedger> {
        self.ledgers.get(token).ok_or(GovernanceError::UnknownToken(*token))
    }

    fn votes(&self) -> AggregateVotes<'_> {
        self.aggregator.with_ledgers(&self.ledgers)
    }

    /// Add a ledger for a token governance may later support.
    pub fn register_token(&mut self, token: Address, name: impl Into<String>) -> Result<()> {
        if token.is_zero() || self.ledgers.contains_key(&token) {
            return Err(GovernanceError::InvalidParameter(format!(
                "token {:x} unavailable",
                token
            )));
        }
        self.ledgers
            .insert(token, VotingLedger::new(name, token, self.env.chain_id)?);
        Ok(())
    }

    pub fn register_target(&mut self, address: Address, target: Box<dyn CallTarget>) -> Result<()> {
        self.ensure_not_component(&address)?;
        self.targets.register(address, target)
    }

    /// Deploy another timelock administered by the engine. Governance can
    /// switch to it with `updateTimelock`.
    pub fn register_timelock(&mut self, address: Address, delay: u64) -> Result<()> {
        self.ensure_not_component(&address)?;
        if address.is_zero() || self.targets.contains(&address) {
            return Err(GovernanceError::InvalidParameter(format!(
                "timelock address {:x} unavailable",
                address
            )));
        }
        let timelock = TimelockQueue::new(address, self.engine.address(), delay)?;
        tracing::info!(timelock = %address, delay, "Timelock deployed");
        self.standby.insert(address, timelock);
        Ok(())
    }

    fn ensure_not_component(&self, address: &Address) -> Result<()> {
        let reserved = [
            self.engine.address(),
            self.timelock.address(),
            self.aggregator.address(),
        ];
        if reserved.contains(address)
            || self.standby.contains_key(address)
            || self.ledgers.contains_key(address)
        {
            return Err(GovernanceError::InvalidParameter(format!(
                "address {:x} is a governance component",
                address
            )));
        }
        Ok(())
    }

    /// Borrow a registered target as its concrete type.
    pub fn target<T: 'static>(&self, address: &Address) -> Option<&T> {
        self.targets.get(address)
    }

    // Voting ledger

    pub fn mint(&mut self, token: Address, to: Address, amount: Amount) -> Result<()> {
        self.transact(|rt| {
            let (env, log) = (rt.env, &mut rt.log);
            let ledger = rt.ledgers.get_mut(&token).ok_or(GovernanceError::UnknownToken(token))?;
            ledger.on_mint(to, amount, &env, log)
        })
    }

    pub fn burn(&mut self, token: Address, from: Address, amount: Amount) -> Result<()> {
        self.transact(|rt| {
            let (env, log) = (rt.env, &mut rt.log);
            let ledger = rt.ledgers.get_mut(&token).ok_or(GovernanceError::UnknownToken(token))?;
            ledger.on_burn(from, amount, &env, log)
        })
    }

    pub fn transfer(&mut self, token: Address, from: Address, to: Address, amount: Amount) -> Result<()> {
        self.transact(|rt| {
            let (env, log) = (rt.env, &mut rt.log);
            let ledger = rt.ledgers.get_mut(&token).ok_or(GovernanceError::UnknownToken(token))?;
            ledger.on_transfer(from, to, amount, &env, log)
        })
    }

    pub fn delegate(&mut self, caller: Address, token: Address, delegatee: Address) -> Result<()> {
        self.transact(|rt| {
            let (env, log) = (rt.env, &mut rt.log);
            let ledger = rt.ledgers.get_mut(&token).ok_or(GovernanceError::UnknownToken(token))?;
            ledger.delegate(caller, delegatee, &env, log)
        })
    }

    pub fn delegate_by_sig(
        &mut self,
        token: Address,
        delegatee: Address,
        nonce: u64,
        expiry: Timestamp,
        signed: &SignedMessage,
    ) -> Result<Address> {
        self.transact(|rt| {
            let (env, log) = (rt.env, &mut rt.log);
            let ledger = rt.ledgers.get_mut(&token).ok_or(GovernanceError::UnknownToken(token))?;
            ledger.delegate_by_sig(delegatee, nonce, expiry, signed, &env, log)
        })
    }

    /// Aggregate current votes.
    pub fn current_votes(&self, account: &Address) -> Amount {
        self.votes().current_votes(account)
    }

    /// Aggregate votes at the end of a past block.
    pub fn prior_votes(&self, account: &Address, block: BlockNumber) -> Result<Amount> {
        self.votes().prior_votes(account, block, &self.env)
    }

    pub fn prior_total_supply(&self, block: BlockNumber) -> Result<Amount> {
        self.votes().prior_total_supply(block, &self.env)
    }

    // Aggregator

    pub fn supported_tokens(&self) -> &[Address] {
        self.aggregator.supported_tokens()
    }

    pub fn set_supported_tokens(&mut self, caller: Address, tokens: Vec<Address>) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.aggregator.set_supported_tokens(caller, tokens, &env, &mut rt.log)
        })
    }

    // Proposal engine

    pub fn propose(
        &mut self,
        caller: Address,
        actions: ProposalActions,
        description: impl Into<String>,
    ) -> Result<u64> {
        let description = description.into();
        self.transact(|rt| {
            let votes = rt.aggregator.with_ledgers(&rt.ledgers);
            rt.engine.propose(caller, actions, description, &votes, &rt.env, &mut rt.log)
        })
    }

    pub fn cast_vote(&mut self, caller: Address, id: u64, support: impl Into<VoteSupport>) -> Result<Amount> {
        let support = support.into();
        self.transact(|rt| {
            let votes = rt.aggregator.with_ledgers(&rt.ledgers);
            rt.engine.cast_vote(caller, id, support, &votes, &rt.env, &mut rt.log)
        })
    }

    pub fn cast_vote_with_reason(
        &mut self,
        caller: Address,
        id: u64,
        support: impl Into<VoteSupport>,
        reason: impl Into<String>,
    ) -> Result<Amount> {
        let (support, reason) = (support.into(), reason.into());
        self.transact(|rt| {
            let votes = rt.aggregator.with_ledgers(&rt.ledgers);
            rt.engine
                .cast_vote_with_reason(caller, id, support, reason, &votes, &rt.env, &mut rt.log)
        })
    }

    pub fn cast_vote_by_sig(
        &mut self,
        id: u64,
        support: impl Into<VoteSupport>,
        signed: &SignedMessage,
    ) -> Result<Address> {
        let support = support.into();
        self.transact(|rt| {
            let votes = rt.aggregator.with_ledgers(&rt.ledgers);
            rt.engine
                .cast_vote_by_sig(id, support, signed, &votes, &rt.env, &mut rt.log)
        })
    }

    pub fn state(&self, id: u64) -> Result<ProposalState> {
        self.engine.state(id, &self.votes(), &self.env)
    }

    pub fn quorum(&self, block: BlockNumber) -> Result<Amount> {
        self.engine.quorum(block, &self.votes(), &self.env)
    }

    pub fn proposal(&self, id: u64) -> Result<&Proposal> {
        self.engine.proposal(id)
    }

    pub fn get_actions(&self, id: u64) -> Result<ProposalActions> {
        self.engine.get_actions(id)
    }

    pub fn get_receipt(&self, id: u64, voter: &Address) -> Result<Receipt> {
        self.engine.get_receipt(id, voter)
    }

    pub fn queue(&mut self, caller: Address, id: u64) -> Result<Timestamp> {
        tracing::debug!(%caller, id, "Queue requested");
        self.transact(|rt| {
            let votes = rt.aggregator.with_ledgers(&rt.ledgers);
            rt.engine.queue(id, &mut rt.timelock, &votes, &rt.env, &mut rt.log)
        })
    }

    pub fn execute(&mut self, caller: Address, id: u64) -> Result<()> {
        self.transact(|rt| {
            // Power reads only look at past blocks, so a copy taken before
            // execution answers them.
            let aggregator = rt.aggregator.clone();
            {
                let votes = aggregator.with_ledgers(&rt.ledgers);
                let engine = rt.engine.address();
                let mut router = Router::new(rt.env, &mut rt.aggregator, None, &mut rt.targets, &mut rt.log);
                router.stack.enter(engine, caller, 0)?;
                router.stack.enter(rt.timelock.address(), engine, 0)?;
                rt.engine.execute(id, &mut rt.timelock, &votes, &mut router)?;
            }
            rt.switch_timelock()
        })
    }

    pub fn cancel(&mut self, caller: Address, id: u64) -> Result<()> {
        self.transact(|rt| {
            let votes = rt.aggregator.with_ledgers(&rt.ledgers);
            rt.engine
                .cancel(caller, id, &mut rt.timelock, &votes, &rt.env, &mut rt.log)
        })
    }

    /// Guardian completes a timelock handoff to the engine.
    pub fn guardian_accept_admin(&mut self, caller: Address) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.accept_admin(caller, &mut rt.timelock, &env, &mut rt.log)
        })
    }

    pub fn abdicate(&mut self, caller: Address) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.abdicate(caller, &env, &mut rt.log)
        })
    }

    pub fn queue_set_timelock_pending_admin(
        &mut self,
        caller: Address,
        pending_admin: Address,
        eta: Timestamp,
    ) -> Result<Hash> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine
                .queue_set_timelock_pending_admin(caller, pending_admin, eta, &mut rt.timelock, &env, &mut rt.log)
        })
    }

    pub fn execute_set_timelock_pending_admin(
        &mut self,
        caller: Address,
        pending_admin: Address,
        eta: Timestamp,
    ) -> Result<()> {
        self.transact(|rt| {
            let engine = rt.engine.address();
            let mut router = Router::new(rt.env, &mut rt.aggregator, None, &mut rt.targets, &mut rt.log);
            router.stack.enter(engine, caller, 0)?;
            router.stack.enter(rt.timelock.address(), engine, 0)?;
            rt.engine
                .execute_set_timelock_pending_admin(caller, pending_admin, eta, &mut rt.timelock, &mut router)
        })
    }

    pub fn set_voting_delay(&mut self, caller: Address, delay: u64) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.set_voting_delay(caller, delay, &env, &mut rt.log)
        })
    }

    pub fn set_voting_period(&mut self, caller: Address, period: u64) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.set_voting_period(caller, period, &env, &mut rt.log)
        })
    }

    pub fn set_proposal_threshold(&mut self, caller: Address, threshold: Amount) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.set_proposal_threshold(caller, threshold, &env, &mut rt.log)
        })
    }

    pub fn update_quorum_numerator(&mut self, caller: Address, numerator: u64) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.update_quorum_numerator(caller, numerator, &env, &mut rt.log)
        })
    }

    /// Governance only. `timelock` must have been deployed with
    /// [`register_timelock`](Self::register_timelock).
    pub fn update_timelock(&mut self, caller: Address, timelock: Address) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.engine.update_timelock(caller, timelock, &env, &mut rt.log)?;
            rt.switch_timelock()
        })
    }

    // Timelock

    pub fn deposit(&mut self, amount: Amount) -> Result<()> {
        self.transact(|rt| rt.timelock.deposit(amount))
    }

    pub fn queue_transaction(&mut self, caller: Address, action: &Action, eta: Timestamp) -> Result<Hash> {
        self.transact(|rt| {
            let env = rt.env;
            rt.timelock.queue_transaction(caller, action, eta, &env, &mut rt.log)
        })
    }

    pub fn execute_transaction(&mut self, caller: Address, action: &Action, eta: Timestamp) -> Result<Vec<u8>> {
        self.transact(|rt| {
            let output = {
                let mut router = Router::new(
                    rt.env,
                    &mut rt.aggregator,
                    Some(&mut rt.engine),
                    &mut rt.targets,
                    &mut rt.log,
                );
                router.stack.enter(rt.timelock.address(), caller, 0)?;
                rt.timelock.execute_transaction(caller, action, eta, &mut router)?
            };
            rt.switch_timelock()?;
            Ok(output)
        })
    }

    /// Returns whether a queued entry was removed.
    pub fn cancel_transaction(&mut self, caller: Address, action: &Action, eta: Timestamp) -> Result<bool> {
        self.transact(|rt| {
            let env = rt.env;
            rt.timelock.cancel_transaction(caller, action, eta, &env, &mut rt.log)
        })
    }

    /// Only the timelock itself may call this; anyone else is refused.
    pub fn set_pending_admin(&mut self, caller: Address, pending_admin: Address) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.timelock.set_pending_admin(caller, pending_admin, &env, &mut rt.log)
        })
    }

    pub fn accept_admin(&mut self, caller: Address) -> Result<()> {
        self.transact(|rt| {
            let env = rt.env;
            rt.timelock.accept_admin(caller, &env, &mut rt.log)
        })
    }
}

/// Routes calls made while the timelock executes.
///
/// Every call pushes a frame; a call into anything already on the stack
/// (the engine, the timelock, or a target that is still running) fails.
struct Router<'a> {
    env: BlockEnv,
    stack: CallStack,
    aggregator: &'a mut VotingPowerAggregator,
    /// Reachable only when the engine is not itself executing.
    engine: Option<&'a mut ProposalEngine>,
    targets: &'a mut TargetRegistry,
    log: &'a mut EventLog,
}

impl<'a> Router<'a> {
    fn new(
        env: BlockEnv,
        aggregator: &'a mut VotingPowerAggregator,
        engine: Option<&'a mut ProposalEngine>,
        targets: &'a mut TargetRegistry,
        log: &'a mut EventLog,
    ) -> Self {
        Self {
            env,
            stack: CallStack::new(),
            aggregator,
            engine,
            targets,
            log,
        }
    }

    fn route(&mut self, invocation: &Invocation) -> Result<Vec<u8>> {
        if invocation.target == self.aggregator.address() {
            return self.aggregator.dispatch(invocation, &self.env, self.log);
        }
        if let Some(engine) = self.engine.as_deref_mut() {
            if invocation.target == engine.address() {
                return engine.dispatch(invocation, &self.env, self.log);
            }
        }

        let mut target = self
            .targets
            .take(&invocation.target)
            .ok_or(GovernanceError::UnknownTarget(invocation.target))?;
        let result = target.invoke(invocation, self);
        self.targets.restore(invocation.target, target);
        result
    }
}

impl Host for Router<'_> {
    fn env(&self) -> &BlockEnv {
        &self.env
    }

    fn emit(&mut self, event: GovernanceEvent) {
        self.log.emit(self.env.number, event);
    }

    fn call(&mut self, invocation: Invocation) -> Result<Vec<u8>> {
        self.stack
            .enter(invocation.target, invocation.caller, invocation.value)?;
        tracing::trace!(
            target_address = %invocation.target,
            caller = %invocation.caller,
            depth = self.stack.depth(),
            "Call"
        );
        let result = self.route(&invocation);
        self.stack.exit()?;
        result
    }
}
