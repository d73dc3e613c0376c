//! Voting power summed across a primary token and governance-managed
//! secondary tokens.

use agora_types::{Address, Amount, BlockNumber};

use crate::action::Invocation;
use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};
use crate::events::{EventLog, GovernanceEvent};
use crate::ledger::{ensure_past, TokenLedgers, VotingLedger, VotingPower};

pub const SET_SUPPORTED_TOKENS: &str = "setSupportedTokens(address[])";

#[derive(Debug, Clone)]
pub struct VotingPowerAggregator {
    address: Address,
    primary: Address,
    /// Only this address may replace the token list (the timelock).
    executor: Address,
    /// `(from_block, tokens)`, ascending by block
    history: Vec<(BlockNumber, Vec<Address>)>,
}

impl VotingPowerAggregator {
    pub fn new(
        address: Address,
        primary: Address,
        executor: Address,
        supported: Vec<Address>,
        env: &BlockEnv,
    ) -> Result<Self> {
        validate_tokens(&primary, &supported)?;
        Ok(Self {
            address,
            primary,
            executor,
            history: vec![(env.number, supported)],
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn primary(&self) -> Address {
        self.primary
    }

    pub fn executor(&self) -> Address {
        self.executor
    }

    /// Follow governance to a new timelock.
    pub(crate) fn set_executor(&mut self, executor: Address) {
        tracing::info!(old = %self.executor, new = %executor, "Aggregator executor changed");
        self.executor = executor;
    }

    /// Current secondary tokens.
    pub fn supported_tokens(&self) -> &[Address] {
        self.history.last().map(|(_, t)| t.as_slice()).unwrap_or(&[])
    }

    /// Secondary tokens in effect for snapshots taken at `block`.
    pub fn supported_tokens_at(&self, block: BlockNumber) -> &[Address] {
        self.history
            .iter()
            .rev()
            .find(|(from, _)| *from <= block)
            .map(|(_, t)| t.as_slice())
            .unwrap_or(&[])
    }

    /// Replace the secondary token list. Applies to snapshots at or after
    /// the current block.
    pub fn set_supported_tokens(
        &mut self,
        caller: Address,
        tokens: Vec<Address>,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        if caller != self.executor {
            return Err(GovernanceError::NotGovernance(caller));
        }
        validate_tokens(&self.primary, &tokens)?;

        let old = self.supported_tokens().to_vec();
        match self.history.last_mut() {
            Some((from, current)) if *from == env.number => *current = tokens.clone(),
            _ => self.history.push((env.number, tokens.clone())),
        }

        tracing::info!(old = old.len(), new = tokens.len(), block = env.number, "Supported tokens updated");
        log.emit(env.number, GovernanceEvent::SupportedTokensUpdated { old, new: tokens });
        Ok(())
    }

    /// View over the given ledgers that sums voting power.
    pub fn with_ledgers<'a>(&'a self, ledgers: &'a TokenLedgers) -> AggregateVotes<'a> {
        AggregateVotes {
            aggregator: self,
            ledgers,
        }
    }

    pub(crate) fn dispatch(
        &mut self,
        invocation: &Invocation,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Vec<u8>> {
        if invocation.is(SET_SUPPORTED_TOKENS) {
            let tokens: Vec<Address> = invocation.decode()?;
            self.set_supported_tokens(invocation.caller, tokens, env, log)?;
            return Ok(Vec::new());
        }
        Err(invocation.unknown_selector())
    }
}

fn validate_tokens(primary: &Address, tokens: &[Address]) -> Result<()> {
    for (i, token) in tokens.iter().enumerate() {
        if token.is_zero() || token == primary {
            return Err(GovernanceError::InvalidSupportedToken(*token));
        }
        if tokens[..i].contains(token) {
            return Err(GovernanceError::DuplicateSupportedToken(*token));
        }
    }
    Ok(())
}

/// Aggregate voting power over a set of ledgers.
#[derive(Debug, Clone, Copy)]
pub struct AggregateVotes<'a> {
    aggregator: &'a VotingPowerAggregator,
    ledgers: &'a TokenLedgers,
}

impl<'a> AggregateVotes<'a> {
    fn ledger(&self, token: &Address) -> Option<&'a VotingLedger> {
        let ledger = self.ledgers.get(token);
        if ledger.is_none() {
            tracing::warn!(%token, "No ledger registered for token, counting zero votes");
        }
        ledger
    }

    fn tokens_at(&self, block: BlockNumber) -> impl Iterator<Item = &'a Address> {
        let aggregator = self.aggregator;
        std::iter::once(&aggregator.primary).chain(aggregator.supported_tokens_at(block).iter())
    }

    fn sum<F>(&self, tokens: impl Iterator<Item = &'a Address>, mut f: F) -> Result<Amount>
    where
        F: FnMut(&VotingLedger) -> Result<Amount>,
    {
        let mut total: Amount = 0;
        for token in tokens {
            if let Some(ledger) = self.ledger(token) {
                total = total.checked_add(f(ledger)?).ok_or(GovernanceError::VotesOverflow)?;
            }
        }
        Ok(total)
    }
}

impl VotingPower for AggregateVotes<'_> {
    fn current_votes(&self, account: &Address) -> Amount {
        let aggregator = self.aggregator;
        std::iter::once(&aggregator.primary)
            .chain(aggregator.supported_tokens().iter())
            .filter_map(|token| self.ledger(token))
            .fold(0, |total: Amount, ledger| total.saturating_add(ledger.current_votes(account)))
    }

    fn prior_votes(&self, account: &Address, block: BlockNumber, env: &BlockEnv) -> Result<Amount> {
        ensure_past(block, env)?;
        self.sum(self.tokens_at(block), |ledger| ledger.prior_votes(account, block, env))
    }

    fn prior_total_supply(&self, block: BlockNumber, env: &BlockEnv) -> Result<Amount> {
        ensure_past(block, env)?;
        self.sum(self.tokens_at(block), |ledger| ledger.prior_total_supply(block, env))
    }
}
