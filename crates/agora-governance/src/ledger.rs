//! Checkpointed voting power for one token.
//!
//! The token itself lives elsewhere; it reports balance changes through
//! [`VotingLedger::on_mint`], [`VotingLedger::on_burn`] and
//! [`VotingLedger::on_transfer`]. An account's balance counts toward the
//! votes of its delegatee, and every change to a delegatee's votes is
//! recorded as a checkpoint at the current block so that past power can be
//! looked up with [`VotingLedger::prior_votes`].

use std::collections::{BTreeMap, HashMap};

use agora_crypto::{recover_signer, Domain, SignedMessage};
use agora_types::{Address, Amount, BlockNumber, Hash, Timestamp};

use crate::checkpoint::{Checkpoint, CheckpointHistory};
use crate::env::BlockEnv;
use crate::error::{GovernanceError, Result};
use crate::events::{EventLog, GovernanceEvent};

/// Type tag of a signed delegation.
pub const DELEGATION_TYPE: &str = "Delegation(address delegatee,u64 nonce,u64 expiry)";

/// Ledgers by token address.
pub type TokenLedgers = BTreeMap<Address, VotingLedger>;

/// Read access to snapshotted voting power.
pub trait VotingPower {
    /// Votes as of the latest checkpoint.
    fn current_votes(&self, account: &Address) -> Amount;

    /// Votes at the end of `block`, which must be in the past.
    fn prior_votes(&self, account: &Address, block: BlockNumber, env: &BlockEnv) -> Result<Amount>;

    /// Total supply at the end of `block`, which must be in the past.
    fn prior_total_supply(&self, block: BlockNumber, env: &BlockEnv) -> Result<Amount>;
}

/// Canonical bytes of a delegation authorization.
pub fn delegation_message(delegatee: &Address, nonce: u64, expiry: Timestamp) -> Result<Vec<u8>> {
    borsh::to_vec(&(delegatee, nonce, expiry))
        .map_err(|e| GovernanceError::InvalidCalldata(e.to_string()))
}

pub(crate) fn ensure_past(block: BlockNumber, env: &BlockEnv) -> Result<()> {
    if block >= env.number {
        return Err(GovernanceError::NotYetDetermined {
            block,
            current: env.number,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct VotingLedger {
    token: Address,
    name: String,
    balances: HashMap<Address, Amount>,
    total_supply: Amount,
    delegates: HashMap<Address, Address>,
    checkpoints: HashMap<Address, CheckpointHistory>,
    supply_checkpoints: CheckpointHistory,
    nonces: HashMap<Address, u64>,
    domain_separator: Hash,
}

impl VotingLedger {
    pub fn new(name: impl Into<String>, token: Address, chain_id: u64) -> Result<Self> {
        let name = name.into();
        let domain_separator = Domain::new(name.clone(), chain_id, token).separator()?;
        Ok(Self {
            token,
            name,
            balances: HashMap::new(),
            total_supply: 0,
            delegates: HashMap::new(),
            checkpoints: HashMap::new(),
            supply_checkpoints: CheckpointHistory::new(),
            nonces: HashMap::new(),
            domain_separator,
        })
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain_separator(&self) -> Hash {
        self.domain_separator
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Current delegatee of `account`; zero when unset.
    pub fn delegates(&self, account: &Address) -> Address {
        self.delegates.get(account).copied().unwrap_or(Address::ZERO)
    }

    /// Next nonce expected from `account` for a signed delegation.
    pub fn nonce(&self, account: &Address) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    pub fn num_checkpoints(&self, account: &Address) -> usize {
        self.checkpoints.get(account).map(CheckpointHistory::len).unwrap_or(0)
    }

    pub fn checkpoint(&self, account: &Address, pos: usize) -> Option<Checkpoint> {
        self.checkpoints.get(account)?.get(pos).copied()
    }

    /// Reflect newly minted tokens.
    pub fn on_mint(
        &mut self,
        to: Address,
        amount: Amount,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        if to.is_zero() {
            return Err(GovernanceError::InvalidParameter("cannot mint to the zero address".into()));
        }
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(GovernanceError::VotesOverflow)?;
        let balance = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or(GovernanceError::VotesOverflow)?;

        self.move_voting_power(Address::ZERO, self.delegates(&to), amount, env, log)?;
        self.balances.insert(to, balance);
        self.total_supply = total_supply;
        self.supply_checkpoints.write(env.number, total_supply);
        Ok(())
    }

    /// Reflect burned tokens.
    pub fn on_burn(
        &mut self,
        from: Address,
        amount: Amount,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        let balance = self.debit(&from, amount)?;
        let total_supply = self
            .total_supply
            .checked_sub(amount)
            .ok_or(GovernanceError::VotesUnderflow)?;

        self.move_voting_power(self.delegates(&from), Address::ZERO, amount, env, log)?;
        self.balances.insert(from, balance);
        self.total_supply = total_supply;
        self.supply_checkpoints.write(env.number, total_supply);
        Ok(())
    }

    /// Reflect a transfer between two holders.
    pub fn on_transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        if from.is_zero() || to.is_zero() {
            return Err(GovernanceError::InvalidParameter(
                "transfer involving the zero address".into(),
            ));
        }
        let from_balance = self.debit(&from, amount)?;
        self.balances.insert(from, from_balance);
        let to_balance = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or(GovernanceError::VotesOverflow)?;
        self.balances.insert(to, to_balance);

        self.move_voting_power(self.delegates(&from), self.delegates(&to), amount, env, log)
    }

    /// Point `delegator`'s balance at `delegatee`. Delegating to the zero
    /// address stops the balance from being counted anywhere.
    pub fn delegate(
        &mut self,
        delegator: Address,
        delegatee: Address,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        let current = self.delegates(&delegator);
        let amount = self.balance_of(&delegator);

        if delegatee.is_zero() {
            self.delegates.remove(&delegator);
        } else {
            self.delegates.insert(delegator, delegatee);
        }

        log.emit(
            env.number,
            GovernanceEvent::DelegateChanged {
                token: self.token,
                delegator,
                from_delegate: current,
                to_delegate: delegatee,
            },
        );
        tracing::debug!(token = %self.token, %delegator, %delegatee, "Delegation changed");

        self.move_voting_power(current, delegatee, amount, env, log)
    }

    /// Delegate on behalf of whoever signed `(delegatee, nonce, expiry)`.
    /// Returns the signer.
    pub fn delegate_by_sig(
        &mut self,
        delegatee: Address,
        nonce: u64,
        expiry: Timestamp,
        signed: &SignedMessage,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<Address> {
        let message = delegation_message(&delegatee, nonce, expiry)?;
        let signatory = recover_signer(&self.domain_separator, DELEGATION_TYPE, &message, signed)
            .ok_or_else(|| GovernanceError::InvalidSignature("delegation signer mismatch".into()))?;

        let expected = self.nonce(&signatory);
        if nonce != expected {
            return Err(GovernanceError::InvalidNonce {
                expected,
                actual: nonce,
            });
        }
        if env.timestamp > expiry {
            return Err(GovernanceError::SignatureExpired {
                expiry,
                now: env.timestamp,
            });
        }

        self.nonces.insert(signatory, expected + 1);
        self.delegate(signatory, delegatee, env, log)?;
        Ok(signatory)
    }

    fn debit(&self, account: &Address, amount: Amount) -> Result<Amount> {
        let balance = self.balance_of(account);
        balance
            .checked_sub(amount)
            .ok_or(GovernanceError::InsufficientBalance {
                account: *account,
                balance,
                amount,
            })
    }

    /// Shift `amount` votes from one delegatee to another. Unset sides are
    /// skipped.
    fn move_voting_power(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
        env: &BlockEnv,
        log: &mut EventLog,
    ) -> Result<()> {
        if from == to || amount == 0 {
            return Ok(());
        }

        let from_votes = if from.is_zero() {
            None
        } else {
            let old = self.current_votes(&from);
            Some(old.checked_sub(amount).ok_or(GovernanceError::VotesUnderflow)?)
        };
        let to_votes = if to.is_zero() {
            None
        } else {
            let old = self.current_votes(&to);
            Some(old.checked_add(amount).ok_or(GovernanceError::VotesOverflow)?)
        };

        if let Some(votes) = from_votes {
            self.write_checkpoint(from, votes, env, log);
        }
        if let Some(votes) = to_votes {
            self.write_checkpoint(to, votes, env, log);
        }
        Ok(())
    }

    fn write_checkpoint(&mut self, delegatee: Address, votes: Amount, env: &BlockEnv, log: &mut EventLog) {
        let previous = self
            .checkpoints
            .entry(delegatee)
            .or_default()
            .write(env.number, votes);

        tracing::debug!(
            token = %self.token,
            %delegatee,
            block = env.number,
            previous,
            votes,
            "Checkpoint written"
        );
        log.emit(
            env.number,
            GovernanceEvent::DelegateVotesChanged {
                token: self.token,
                delegate: delegatee,
                previous_votes: previous,
                new_votes: votes,
            },
        );
    }
}

impl VotingPower for VotingLedger {
    fn current_votes(&self, account: &Address) -> Amount {
        self.checkpoints.get(account).map(CheckpointHistory::latest).unwrap_or(0)
    }

    fn prior_votes(&self, account: &Address, block: BlockNumber, env: &BlockEnv) -> Result<Amount> {
        ensure_past(block, env)?;
        Ok(self.checkpoints.get(account).map(|h| h.at(block)).unwrap_or(0))
    }

    fn prior_total_supply(&self, block: BlockNumber, env: &BlockEnv) -> Result<Amount> {
        ensure_past(block, env)?;
        Ok(self.supply_checkpoints.at(block))
    }
}
