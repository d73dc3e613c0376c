//! Delayed execution queue.
//!
//! An admin queues an action for an `eta` at least `delay` seconds away,
//! and may execute it between `eta` and `eta + GRACE_PERIOD`. A queued
//! transaction is identified by [`Action::tx_hash`], so the same action for
//! the same eta can only be in flight once.
//!
//! The timelock administers itself: changing the admin or the delay is a
//! call whose target is the timelock's own address, which therefore has to
//! wait out the delay like any other action.

use std::collections::HashSet;

use agora_types::{Address, Amount, Hash, Timestamp};

use crate::action::{Action, Host, Invocation};
use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};
use crate::events::{EventLog, GovernanceEvent};

const DAY: u64 = 24 * 60 * 60;

/// How long after its eta a transaction stays executable.
pub const GRACE_PERIOD: u64 = 7 * DAY;
pub const MINIMUM_DELAY: u64 = 2 * DAY;
pub const MAXIMUM_DELAY: u64 = 30 * DAY;

pub const SET_PENDING_ADMIN: &str = "setPendingAdmin(address)";
pub const SET_DELAY: &str = "setDelay(u64)";
pub const ACCEPT_ADMIN: &str = "acceptAdmin()";

#[derive(Debug, Clone)]
pub struct TimelockQueue {
    address: Address,
    admin: Address,
    pending_admin: Address,
    delay: u64,
    queued: HashSet<Hash>,
    /// Funds that action values are paid from
    balance: Amount,
}

impl TimelockQueue {
    pub fn new(address: Address, admin: Address, delay: u64) -> Result<Self> {
        check_delay(delay)?;
        Ok(Self {
            address,
            admin,
            pending_admin: Address::ZERO,
            delay,
            queued: HashSet::new(),
            balance: 0,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    /// Zero when no handoff is in progress.
    pub fn pending_admin(&self) -> Address {
        self.pending_admin
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn is_queued(&self, hash: &Hash) -> bool {
        self.queued.contains(hash)
    }

    pub fn deposit(&mut self, amount: Amount) -> Result<()> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| GovernanceError::InvalidParameter("timelock balance overflows".into()))?;
        Ok(())
    }

    pub fn queue_transaction(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Timestamp,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Hash> {
        self.only_admin(caller)?;

        let earliest = env.timestamp.saturating_add(self.delay);
        if eta < earliest {
            return Err(GovernanceError::InsufficientDelay { eta, earliest });
        }

        let hash = action.tx_hash(eta)?;
        if !self.queued.insert(hash) {
            return Err(GovernanceError::AlreadyQueued(hash));
        }

        tracing::debug!(%hash, target = %action.target, eta, "Transaction queued");
        log.emit(env.number, GovernanceEvent::call_scheduled(hash, action, eta));
        Ok(hash)
    }

    /// Drop a queued transaction. Returns `false`, and emits nothing, when
    /// it was not queued.
    pub fn cancel_transaction(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Timestamp,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<bool> {
        self.only_admin(caller)?;

        let hash = action.tx_hash(eta)?;
        if !self.queued.remove(&hash) {
            return Ok(false);
        }

        tracing::debug!(%hash, "Transaction cancelled");
        log.emit(env.number, GovernanceEvent::Cancelled { hash });
        Ok(true)
    }

    /// Run a queued transaction through `host`.
    ///
    /// Execution is allowed from `eta` up to and including
    /// `eta + GRACE_PERIOD`. If the call fails the transaction stays queued.
    pub fn execute_transaction(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Timestamp,
        host: &mut dyn Host,
    ) -> Result<Vec<u8>> {
        self.only_admin(caller)?;

        let hash = action.tx_hash(eta)?;
        if !self.queued.contains(&hash) {
            return Err(GovernanceError::NotQueued(hash));
        }
        let env = *host.env();
        if env.timestamp < eta {
            return Err(GovernanceError::TooEarly {
                eta,
                now: env.timestamp,
            });
        }
        let deadline = eta.saturating_add(GRACE_PERIOD);
        if env.timestamp > deadline {
            return Err(GovernanceError::Stale {
                deadline,
                now: env.timestamp,
            });
        }

        let to_self = action.target == self.address;
        if !to_self && action.value > self.balance {
            return Err(GovernanceError::InsufficientFunds {
                balance: self.balance,
                value: action.value,
            });
        }

        self.queued.remove(&hash);
        if !to_self {
            self.balance -= action.value;
        }

        let invocation = Invocation::new(self.address, action.target, action.value, action.calldata());
        let result = if to_self {
            let mut events = EventLog::new();
            let out = self.dispatch(&invocation, &env, &mut events);
            events.into_events().for_each(|e| host.emit(e));
            out
        } else {
            host.call(invocation)
        };

        match result {
            Ok(output) => {
                tracing::info!(%hash, target = %action.target, "Transaction executed");
                host.emit(GovernanceEvent::CallExecuted {
                    hash,
                    target: action.target,
                    value: action.value,
                    eta,
                });
                Ok(output)
            }
            Err(e) => {
                self.queued.insert(hash);
                if !to_self {
                    self.balance += action.value;
                }
                tracing::warn!(%hash, target = %action.target, error = %e, "Transaction execution reverted");
                Err(match e {
                    GovernanceError::Reentrancy(_)
                    | GovernanceError::CallDepthExceeded { .. }
                    | GovernanceError::ExecutionReverted(_) => e,
                    other => GovernanceError::ExecutionReverted(other.to_string()),
                })
            }
        }
    }

    /// Second half of the admin handoff, called by the pending admin.
    pub fn accept_admin(&mut self, caller: Address, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        if self.pending_admin.is_zero() || caller != self.pending_admin {
            return Err(GovernanceError::NotPendingAdmin(caller));
        }
        self.admin = caller;
        self.pending_admin = Address::ZERO;

        tracing::info!(admin = %caller, "Timelock admin accepted");
        log.emit(env.number, GovernanceEvent::NewAdmin { admin: caller });
        Ok(())
    }

    /// Only reachable through a queued self-call.
    pub fn set_pending_admin(
        &mut self,
        caller: Address,
        pending_admin: Address,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        self.only_self(caller)?;
        self.pending_admin = pending_admin;

        tracing::info!(%pending_admin, "Timelock pending admin set");
        log.emit(env.number, GovernanceEvent::NewPendingAdmin { pending_admin });
        Ok(())
    }

    /// Only reachable through a queued self-call.
    pub fn set_delay(&mut self, caller: Address, delay: u64, env: &BlockEnv, log: &mut EventLog) -> Result<()> {
        self.only_self(caller)?;
        check_delay(delay)?;
        self.delay = delay;

        tracing::info!(delay, "Timelock delay set");
        log.emit(env.number, GovernanceEvent::NewDelay { delay });
        Ok(())
    }

    pub(crate) fn dispatch(
        &mut self,
        invocation: &Invocation,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Vec<u8>> {
        let caller = invocation.caller;
        if invocation.is(SET_PENDING_ADMIN) {
            self.set_pending_admin(caller, invocation.decode()?, env, log)?;
        } else if invocation.is(SET_DELAY) {
            self.set_delay(caller, invocation.decode()?, env, log)?;
        } else if invocation.is(ACCEPT_ADMIN) {
            self.accept_admin(caller, env, log)?;
        } else {
            return Err(invocation.unknown_selector());
        }
        Ok(Vec::new())
    }

    fn only_admin(&self, caller: Address) -> Result<()> {
        if caller != self.admin {
            return Err(GovernanceError::NotAdmin(caller));
        }
        Ok(())
    }

    fn only_self(&self, caller: Address) -> Result<()> {
        if caller != self.address {
            return Err(GovernanceError::NotTimelock(caller));
        }
        Ok(())
    }
}

fn check_delay(delay: u64) -> Result<()> {
    if !(MINIMUM_DELAY..=MAXIMUM_DELAY).contains(&delay) {
        return Err(GovernanceError::InvalidDelay {
            delay,
            min: MINIMUM_DELAY,
            max: MAXIMUM_DELAY,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Host that records calls and optionally fails them.
    struct TestHost {
        env: BlockEnv,
        log: EventLog,
        calls: Vec<Invocation>,
        fail: bool,
    }

    impl TestHost {
        fn at(timestamp: Timestamp) -> Self {
            Self {
                env: BlockEnv::new(1, 10, timestamp),
                log: EventLog::new(),
                calls: Vec::new(),
                fail: false,
            }
        }
    }

    impl Host for TestHost {
        fn env(&self) -> &BlockEnv {
            &self.env
        }

        fn emit(&mut self, event: GovernanceEvent) {
            self.log.emit(self.env.number, event);
        }

        fn call(&mut self, invocation: Invocation) -> Result<Vec<u8>> {
            self.calls.push(invocation);
            if self.fail {
                return Err(GovernanceError::ExecutionReverted("boom".into()));
            }
            Ok(vec![1])
        }
    }

    fn admin() -> Address {
        Address::from_label("admin")
    }

    fn timelock() -> TimelockQueue {
        TimelockQueue::new(Address::from_label("timelock"), admin(), MINIMUM_DELAY).unwrap()
    }

    fn action() -> Action {
        Action::new(Address::from_label("store"), 0, "ping()", vec![])
    }

    const NOW: Timestamp = 1_000_000;

    #[test]
    fn test_delay_bounds() {
        assert!(TimelockQueue::new(Address::ZERO, admin(), MINIMUM_DELAY - 1).is_err());
        assert!(TimelockQueue::new(Address::ZERO, admin(), MAXIMUM_DELAY + 1).is_err());
        assert!(TimelockQueue::new(Address::ZERO, admin(), MAXIMUM_DELAY).is_ok());
    }

    #[test]
    fn test_queue_rules() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let env = BlockEnv::new(1, 10, NOW);
        let eta = NOW + MINIMUM_DELAY;

        let err = tl
            .queue_transaction(Address::from_label("eve"), &action(), eta, &env, &mut log)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::NotAdmin(_)));

        let err = tl.queue_transaction(admin(), &action(), eta - 1, &env, &mut log).unwrap_err();
        assert_eq!(err, GovernanceError::InsufficientDelay { eta: eta - 1, earliest: eta });

        let hash = tl.queue_transaction(admin(), &action(), eta, &env, &mut log).unwrap();
        assert!(tl.is_queued(&hash));
        assert_eq!(
            tl.queue_transaction(admin(), &action(), eta, &env, &mut log),
            Err(GovernanceError::AlreadyQueued(hash))
        );
        // Same action, different eta.
        tl.queue_transaction(admin(), &action(), eta + 1, &env, &mut log).unwrap();
    }

    #[test]
    fn test_execute_window() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let eta = NOW + MINIMUM_DELAY;
        tl.queue_transaction(admin(), &action(), eta, &BlockEnv::new(1, 10, NOW), &mut log)
            .unwrap();

        let mut early = TestHost::at(eta - 1);
        assert_eq!(
            tl.execute_transaction(admin(), &action(), eta, &mut early),
            Err(GovernanceError::TooEarly { eta, now: eta - 1 })
        );

        let mut stale = TestHost::at(eta + GRACE_PERIOD + 1);
        assert!(matches!(
            tl.execute_transaction(admin(), &action(), eta, &mut stale),
            Err(GovernanceError::Stale { .. })
        ));

        let mut last_chance = TestHost::at(eta + GRACE_PERIOD);
        assert_eq!(tl.execute_transaction(admin(), &action(), eta, &mut last_chance).unwrap(), vec![1]);
        assert_eq!(last_chance.calls.len(), 1);
        assert_eq!(last_chance.calls[0].caller, tl.address());
        assert!(!tl.is_queued(&action().tx_hash(eta).unwrap()));

        assert!(matches!(
            tl.execute_transaction(admin(), &action(), eta, &mut last_chance),
            Err(GovernanceError::NotQueued(_))
        ));
    }

    #[test]
    fn test_failed_call_keeps_entry_queued() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let eta = NOW + MINIMUM_DELAY;
        tl.deposit(10).unwrap();
        let paid = action().with_value(4);
        tl.queue_transaction(admin(), &paid, eta, &BlockEnv::new(1, 10, NOW), &mut log)
            .unwrap();

        let mut host = TestHost::at(eta);
        host.fail = true;
        assert_eq!(
            tl.execute_transaction(admin(), &paid, eta, &mut host),
            Err(GovernanceError::ExecutionReverted("boom".into()))
        );
        assert!(tl.is_queued(&paid.tx_hash(eta).unwrap()));
        assert_eq!(tl.balance(), 10);

        host.fail = false;
        tl.execute_transaction(admin(), &paid, eta, &mut host).unwrap();
        assert_eq!(tl.balance(), 6);
        assert_eq!(host.calls[1].value, 4);
    }

    #[test]
    fn test_value_needs_funds() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let eta = NOW + MINIMUM_DELAY;
        let paid = action().with_value(1);
        tl.queue_transaction(admin(), &paid, eta, &BlockEnv::new(1, 10, NOW), &mut log)
            .unwrap();

        let mut host = TestHost::at(eta);
        assert_eq!(
            tl.execute_transaction(admin(), &paid, eta, &mut host),
            Err(GovernanceError::InsufficientFunds { balance: 0, value: 1 })
        );
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let env = BlockEnv::new(1, 10, NOW);
        let eta = NOW + MINIMUM_DELAY;
        tl.queue_transaction(admin(), &action(), eta, &env, &mut log).unwrap();

        assert!(tl.cancel_transaction(admin(), &action(), eta, &env, &mut log).unwrap());
        let events = log.len();
        assert!(!tl.cancel_transaction(admin(), &action(), eta, &env, &mut log).unwrap());
        assert_eq!(log.len(), events);
        assert!(tl
            .cancel_transaction(Address::from_label("eve"), &action(), eta, &env, &mut log)
            .is_err());
    }

    #[test]
    fn test_self_administration() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let env = BlockEnv::new(1, 10, NOW);
        let eta = NOW + MINIMUM_DELAY;
        let new_admin = Address::from_label("new-admin");

        // Direct calls are refused.
        assert_eq!(
            tl.set_pending_admin(admin(), new_admin, &env, &mut log),
            Err(GovernanceError::NotTimelock(admin()))
        );

        let handoff = Action::call(tl.address(), SET_PENDING_ADMIN, &new_admin).unwrap();
        let new_delay = Action::call(tl.address(), SET_DELAY, &(3 * DAY)).unwrap();
        tl.queue_transaction(admin(), &handoff, eta, &env, &mut log).unwrap();
        tl.queue_transaction(admin(), &new_delay, eta, &env, &mut log).unwrap();

        let mut host = TestHost::at(eta);
        tl.execute_transaction(admin(), &handoff, eta, &mut host).unwrap();
        tl.execute_transaction(admin(), &new_delay, eta, &mut host).unwrap();
        assert!(host.calls.is_empty());
        assert_eq!(tl.pending_admin(), new_admin);
        assert_eq!(tl.admin(), admin());
        assert_eq!(tl.delay(), 3 * DAY);

        assert_eq!(
            tl.accept_admin(admin(), &env, &mut log),
            Err(GovernanceError::NotPendingAdmin(admin()))
        );
        tl.accept_admin(new_admin, &env, &mut log).unwrap();
        assert_eq!(tl.admin(), new_admin);
        assert_eq!(tl.pending_admin(), Address::ZERO);
    }

    #[test]
    fn test_self_call_with_bad_delay_reverts() {
        let mut tl = timelock();
        let mut log = EventLog::new();
        let env = BlockEnv::new(1, 10, NOW);
        let eta = NOW + MINIMUM_DELAY;
        let bad = Action::call(tl.address(), SET_DELAY, &1u64).unwrap();
        tl.queue_transaction(admin(), &bad, eta, &env, &mut log).unwrap();

        let mut host = TestHost::at(eta);
        let err = tl.execute_transaction(admin(), &bad, eta, &mut host).unwrap_err();
        assert!(matches!(err, GovernanceError::ExecutionReverted(msg) if msg.contains("Delay")));
        assert_eq!(tl.delay(), MINIMUM_DELAY);
    }
}
