//! Shared fixtures for the governance integration tests.

#![allow(dead_code)]

use std::any::Any;

use agora_governance::{
    Action, CallTarget, GovernanceConfig, GovernanceError, GovernanceRuntime, Host, Invocation,
    ProposalActions, Result,
};
use agora_types::{Address, Amount};
use tracing_subscriber::EnvFilter;

pub const SET_VALUE: &str = "setValue(u64)";
pub const PING: &str = "ping()";

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn alice() -> Address {
    Address::from_label("alice")
}

pub fn bob() -> Address {
    Address::from_label("bob")
}

pub fn carol() -> Address {
    Address::from_label("carol")
}

pub fn store() -> Address {
    Address::from_label("store")
}

/// Short periods and a low threshold keep the scenarios readable.
pub fn config() -> GovernanceConfig {
    GovernanceConfig {
        voting_delay: 1,
        voting_period: 5,
        proposal_threshold: 100,
        quorum_numerator: 4,
        ..GovernanceConfig::default()
    }
}

/// Runtime with a [`Store`] registered at [`store()`].
pub fn runtime(config: &GovernanceConfig) -> GovernanceRuntime {
    init_tracing();
    let mut rt = GovernanceRuntime::new(config).unwrap();
    rt.register_target(store(), Box::new(Store::default())).unwrap();
    rt
}

/// Mint primary tokens to `holder` and self-delegate them.
pub fn fund(rt: &mut GovernanceRuntime, holder: Address, amount: Amount) {
    let token = rt.primary_token();
    rt.mint(token, holder, amount).unwrap();
    rt.delegate(holder, token, holder).unwrap();
}

pub fn set_value(value: u64) -> Action {
    Action::call(store(), SET_VALUE, &value).unwrap()
}

pub fn ping() -> Action {
    Action::new(store(), 0, PING, vec![])
}

pub fn actions(list: impl IntoIterator<Item = Action>) -> ProposalActions {
    list.into_iter().collect()
}

/// Mine into the voting window of a proposal created in the current block.
pub fn start_voting(rt: &mut GovernanceRuntime) {
    let delay = rt.engine().settings().voting_delay;
    rt.mine_blocks(delay + 1);
}

/// Mine past the end of a voting window entered with [`start_voting`].
pub fn end_voting(rt: &mut GovernanceRuntime) {
    let period = rt.engine().settings().voting_period;
    rt.mine_blocks(period);
}

/// Propose, pass with `proposer`'s own votes, and return the id.
pub fn pass(rt: &mut GovernanceRuntime, proposer: Address, list: impl IntoIterator<Item = Action>) -> u64 {
    let id = rt.propose(proposer, actions(list), "test proposal").unwrap();
    start_voting(rt);
    rt.cast_vote(proposer, id, true).unwrap();
    end_voting(rt);
    id
}

/// Pass and queue; returns the id and eta.
pub fn pass_and_queue(
    rt: &mut GovernanceRuntime,
    proposer: Address,
    list: impl IntoIterator<Item = Action>,
) -> (u64, u64) {
    let id = pass(rt, proposer, list);
    let eta = rt.queue(proposer, id).unwrap();
    (id, eta)
}

/// A governed contract holding one number.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub value: u64,
    pub callers: Vec<Address>,
    pub received: Amount,
}

impl CallTarget for Store {
    fn invoke(&mut self, invocation: &Invocation, _host: &mut dyn Host) -> Result<Vec<u8>> {
        if invocation.is(SET_VALUE) {
            self.value = invocation.decode()?;
        } else if !invocation.is(PING) {
            return Err(GovernanceError::UnknownSelector(format!("{:?}", invocation.selector())));
        }
        self.callers.push(invocation.caller);
        self.received += invocation.value;
        Ok(self.value.to_le_bytes().to_vec())
    }

    fn clone_box(&self) -> Box<dyn CallTarget> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fails every call.
#[derive(Debug, Clone, Default)]
pub struct Reverter;

impl CallTarget for Reverter {
    fn invoke(&mut self, _invocation: &Invocation, _host: &mut dyn Host) -> Result<Vec<u8>> {
        Err(GovernanceError::ExecutionReverted("always reverts".into()))
    }

    fn clone_box(&self) -> Box<dyn CallTarget> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Calls `into` with `calldata` whenever it is invoked.
#[derive(Debug, Clone)]
pub struct Reentrant {
    pub into: Address,
    pub calldata: Vec<u8>,
}

impl Reentrant {
    pub fn new(into: Address, action: &Action) -> Self {
        Self {
            into,
            calldata: action.calldata(),
        }
    }
}

impl CallTarget for Reentrant {
    fn invoke(&mut self, invocation: &Invocation, host: &mut dyn Host) -> Result<Vec<u8>> {
        host.call(Invocation::new(invocation.target, self.into, 0, self.calldata.clone()))
    }

    fn clone_box(&self) -> Box<dyn CallTarget> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
