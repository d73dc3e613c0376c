//! Checkpointed voting power through the runtime: delegation, transfers,
//! signed delegation and the multi-token aggregate.

mod common;

use agora_crypto::{sign_typed, Keypair};
use agora_governance::aggregator::SET_SUPPORTED_TOKENS;
use agora_governance::ledger::{delegation_message, DELEGATION_TYPE};
use agora_governance::{Action, GovernanceConfig, GovernanceError, GovernanceEvent};
use agora_types::Address;
use common::*;

fn second() -> Address {
    Address::from_label("token.second")
}

#[test]
fn test_prior_votes_follow_checkpoints() {
    let mut rt = runtime(&config());
    let token = rt.primary_token();

    fund(&mut rt, alice(), 100); // block 1
    rt.mine_blocks(2);
    rt.transfer(token, alice(), bob(), 30).unwrap(); // block 3
    rt.delegate(bob(), token, alice()).unwrap();
    rt.mine_blocks(1);
    rt.delegate(bob(), token, bob()).unwrap(); // block 4
    rt.mine_blocks(1);

    assert_eq!(rt.prior_votes(&alice(), 0).unwrap(), 0);
    assert_eq!(rt.prior_votes(&alice(), 1).unwrap(), 100);
    assert_eq!(rt.prior_votes(&alice(), 2).unwrap(), 100);
    assert_eq!(rt.prior_votes(&alice(), 3).unwrap(), 100);
    assert_eq!(rt.prior_votes(&alice(), 4).unwrap(), 70);
    assert_eq!(rt.prior_votes(&bob(), 4).unwrap(), 30);
    assert_eq!(rt.current_votes(&alice()), 70);

    // Two changes in block 3 leave one checkpoint there.
    let ledger = rt.ledger(&token).unwrap();
    assert_eq!(ledger.num_checkpoints(&alice()), 3);
    assert_eq!(ledger.checkpoint(&alice(), 1).map(|c| c.from_block), Some(3));
}

#[test]
fn test_current_block_is_not_yet_determined() {
    let mut rt = runtime(&config());
    fund(&mut rt, alice(), 100);

    let current = rt.block_number();
    assert_eq!(
        rt.prior_votes(&alice(), current),
        Err(GovernanceError::NotYetDetermined { block: current, current })
    );
    assert!(rt.prior_total_supply(current + 1).is_err());

    rt.mine_blocks(1);
    assert_eq!(rt.prior_total_supply(current).unwrap(), 100);
}

#[test]
fn test_undelegated_balance_counts_nowhere() {
    let mut rt = runtime(&config());
    let token = rt.primary_token();
    rt.mint(token, carol(), 500).unwrap();
    fund(&mut rt, alice(), 50);
    rt.mine_blocks(1);

    assert_eq!(rt.current_votes(&carol()), 0);
    assert_eq!(rt.prior_total_supply(1).unwrap(), 550);

    rt.delegate(alice(), token, Address::ZERO).unwrap();
    assert_eq!(rt.current_votes(&alice()), 0);
    assert!(rt.ledger(&token).unwrap().delegates(&alice()).is_zero());
}

#[test]
fn test_burn_and_failed_transfer() {
    let mut rt = runtime(&config());
    let token = rt.primary_token();
    fund(&mut rt, alice(), 100);

    rt.burn(token, alice(), 40).unwrap();
    assert_eq!(rt.current_votes(&alice()), 60);
    assert_eq!(rt.ledger(&token).unwrap().total_supply(), 60);

    let events = rt.events().len();
    assert_eq!(
        rt.transfer(token, alice(), bob(), 61),
        Err(GovernanceError::InsufficientBalance { account: alice(), balance: 60, amount: 61 })
    );
    assert_eq!(rt.events().len(), events);
    assert!(matches!(
        rt.mint(second(), alice(), 1),
        Err(GovernanceError::UnknownToken(t)) if t == second()
    ));
}

#[test]
fn test_delegation_events() {
    let mut rt = runtime(&config());
    let token = rt.primary_token();
    rt.mint(token, alice(), 10).unwrap();
    rt.delegate(alice(), token, bob()).unwrap();

    let recent: Vec<_> = rt.events().records().iter().rev().take(2).map(|r| r.event.clone()).collect();
    assert_eq!(
        recent,
        vec![
            GovernanceEvent::DelegateVotesChanged {
                token,
                delegate: bob(),
                previous_votes: 0,
                new_votes: 10,
            },
            GovernanceEvent::DelegateChanged {
                token,
                delegator: alice(),
                from_delegate: Address::ZERO,
                to_delegate: bob(),
            },
        ]
    );
}

#[test]
fn test_delegate_by_signature() {
    let mut rt = runtime(&config());
    let token = rt.primary_token();
    let holder = Keypair::from_seed(&[3u8; 32]);
    rt.mint(token, holder.address(), 250).unwrap();
    rt.set_timestamp(1_000);

    let separator = rt.ledger(&token).unwrap().domain_separator();
    let sign = |nonce: u64, expiry: u64| {
        let message = delegation_message(&bob(), nonce, expiry).unwrap();
        sign_typed(&holder, &separator, DELEGATION_TYPE, &message)
    };

    let wrong_nonce = sign(1, 2_000);
    assert_eq!(
        rt.delegate_by_sig(token, bob(), 1, 2_000, &wrong_nonce),
        Err(GovernanceError::InvalidNonce { expected: 0, actual: 1 })
    );

    let expired = sign(0, 999);
    assert_eq!(
        rt.delegate_by_sig(token, bob(), 0, 999, &expired),
        Err(GovernanceError::SignatureExpired { expiry: 999, now: 1_000 })
    );

    let valid = sign(0, 2_000);
    assert!(matches!(
        rt.delegate_by_sig(token, alice(), 0, 2_000, &valid),
        Err(GovernanceError::InvalidSignature(_))
    ));
    assert_eq!(rt.delegate_by_sig(token, bob(), 0, 2_000, &valid).unwrap(), holder.address());
    assert_eq!(rt.current_votes(&bob()), 250);
    assert_eq!(rt.ledger(&token).unwrap().nonce(&holder.address()), 1);

    assert_eq!(
        rt.delegate_by_sig(token, bob(), 0, 2_000, &valid),
        Err(GovernanceError::InvalidNonce { expected: 1, actual: 0 })
    );
}

#[test]
fn test_configured_secondary_tokens_are_summed() {
    let mut rt = runtime(&GovernanceConfig { supported_tokens: vec![second()], ..config() });
    fund(&mut rt, alice(), 100);
    rt.mint(second(), alice(), 25).unwrap();
    rt.delegate(alice(), second(), alice()).unwrap();
    rt.mine_blocks(1);

    assert_eq!(rt.supported_tokens(), &[second()]);
    assert_eq!(rt.current_votes(&alice()), 125);
    assert_eq!(rt.prior_votes(&alice(), 1).unwrap(), 125);
    assert_eq!(rt.prior_total_supply(1).unwrap(), 125);
}

#[test]
fn test_supported_tokens_changed_by_proposal() {
    let mut rt = runtime(&config());
    rt.register_token(second(), "Second").unwrap();
    assert!(rt.register_token(second(), "Again").is_err());

    fund(&mut rt, alice(), 1_000);
    rt.mint(second(), bob(), 500).unwrap();
    rt.delegate(bob(), second(), bob()).unwrap();
    rt.mine_blocks(1);
    assert_eq!(rt.current_votes(&bob()), 0);

    let aggregator = rt.aggregator().address();
    assert_eq!(
        rt.set_supported_tokens(alice(), vec![second()]),
        Err(GovernanceError::NotGovernance(alice()))
    );

    let change = Action::call(aggregator, SET_SUPPORTED_TOKENS, &vec![second()]).unwrap();
    let (id, eta) = pass_and_queue(&mut rt, alice(), [change]);
    rt.set_timestamp(eta);
    rt.execute(alice(), id).unwrap();
    let changed_at = rt.block_number();
    rt.mine_blocks(1);

    assert_eq!(rt.supported_tokens(), &[second()]);
    assert_eq!(rt.current_votes(&bob()), 500);
    assert_eq!(rt.prior_votes(&bob(), changed_at - 1).unwrap(), 0);
    assert_eq!(rt.prior_votes(&bob(), changed_at).unwrap(), 500);
    assert!(rt.events().events().any(|e| e
        == &GovernanceEvent::SupportedTokensUpdated { old: vec![], new: vec![second()] }));
}

#[test]
fn test_invalid_supported_tokens_revert_the_proposal() {
    let mut rt = runtime(&config());
    fund(&mut rt, alice(), 1_000);
    rt.mine_blocks(1);

    let aggregator = rt.aggregator().address();
    let primary = rt.primary_token();
    let bad = Action::call(aggregator, SET_SUPPORTED_TOKENS, &vec![primary]).unwrap();
    let (id, eta) = pass_and_queue(&mut rt, alice(), [bad]);
    rt.set_timestamp(eta);

    let err = rt.execute(alice(), id).unwrap_err();
    assert!(matches!(err, GovernanceError::ExecutionReverted(_)), "{:?}", err);
    assert!(rt.supported_tokens().is_empty());
}

#[test]
fn test_component_addresses_are_reserved() {
    let mut rt = runtime(&config());
    let engine = rt.engine().address();
    let token = rt.primary_token();

    assert!(rt.register_target(engine, Box::new(Store::default())).is_err());
    assert!(rt.register_target(token, Box::new(Store::default())).is_err());
    assert!(rt.register_target(store(), Box::new(Store::default())).is_err());
}
