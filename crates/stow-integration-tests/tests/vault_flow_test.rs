//! Integration tests for the vault on top of the token ledger.
//!
//! Tests custody and the vault's fund mechanics from a controller's view:
//! 1. Deposits and withdrawals moving real tokens
//! 2. Designation and its effect on transfers
//! 3. Locks, burning under a lock
//! 4. Flows streaming between recipients

use proptest::prelude::*;
use stow_core::{Address, Amount, Call, Context, Timestamp};
use stow_token::{Token, TokenLedger};
use stow_vault::{Vault, VaultError};

// ============================================================================
// Helper Functions
// ============================================================================

const START: Timestamp = 1_700_000_000;

fn addr(n: u8) -> Address {
    Address::new([n; 32])
}

fn controller() -> Address {
    addr(10)
}

fn vault_address() -> Address {
    addr(250)
}

fn context() -> Context {
    Context::new([4u8; 32])
}

fn at(now: Timestamp) -> Call {
    Call::new(controller(), now)
}

fn create_vault(funds: u64) -> Vault<TokenLedger> {
    let mut token = TokenLedger::new();
    token.mint(&controller(), Amount::new(funds));
    token.approve(&controller(), &vault_address(), Amount::new(funds));
    Vault::new(vault_address(), token)
}

fn balance(vault: &Vault<TokenLedger>, recipient: Address, now: Timestamp) -> u64 {
    vault
        .get_balance(&controller(), &context(), &recipient, now)
        .units()
}

fn designated(vault: &Vault<TokenLedger>, recipient: Address, now: Timestamp) -> u64 {
    vault
        .get_designated_balance(&controller(), &context(), &recipient, now)
        .units()
}

// ============================================================================
// Custody
// ============================================================================

#[test]
fn deposit_then_withdraw_returns_exact_amount() {
    let mut vault = create_vault(1_000);
    vault
        .deposit(&at(START), context(), addr(1), Amount::new(640))
        .unwrap();
    assert_eq!(vault.token().balance_of(&vault_address()), Amount::new(640));

    let paid = vault.withdraw(&at(START), context(), addr(1)).unwrap();
    assert_eq!(paid, Amount::new(640));
    assert_eq!(vault.token().balance_of(&addr(1)), Amount::new(640));
    assert_eq!(vault.token().balance_of(&vault_address()), Amount::ZERO);
    assert_eq!(balance(&vault, addr(1), START), 0);
}

#[test]
fn designated_funds_cannot_be_transferred() {
    let mut vault = create_vault(1_000);
    vault
        .deposit(&at(START), context(), addr(1), Amount::new(300))
        .unwrap();
    vault
        .designate(&at(START), context(), addr(1), Amount::new(300))
        .unwrap();
    let err = vault
        .transfer(&at(START), context(), addr(1), addr(2), Amount::new(300))
        .unwrap_err();
    assert!(matches!(err, VaultError::InsufficientBalance { .. }));
}

#[test]
fn burn_succeeds_under_lock_and_zeroes_the_account() {
    let mut vault = create_vault(1_000);
    vault
        .deposit(&at(START), context(), addr(1), Amount::new(500))
        .unwrap();
    vault
        .designate(&at(START), context(), addr(1), Amount::new(200))
        .unwrap();
    vault
        .lock(&at(START), context(), START + 100, START + 200)
        .unwrap();
    assert!(matches!(
        vault.withdraw(&at(START + 1), context(), addr(1)),
        Err(VaultError::Locked { .. })
    ));

    let burned = vault.burn(&at(START + 1), context(), addr(1)).unwrap();
    assert_eq!(burned, Amount::new(500));
    assert_eq!(vault.token().balance_of(&Address::BURN), Amount::new(500));
    assert_eq!(balance(&vault, addr(1), START + 1), 0);
    assert_eq!(designated(&vault, addr(1), START + 1), 0);
}

// ============================================================================
// Flows
// ============================================================================

#[test]
fn flow_moves_rate_times_duration_into_designated_balance() {
    let mut vault = create_vault(10_000);
    let rate = 7;
    let duration = 120;
    vault
        .deposit(&at(START), context(), addr(1), Amount::new(5_000))
        .unwrap();
    vault
        .lock(&at(START), context(), START + 300, START + 600)
        .unwrap();
    vault
        .flow(&at(START), context(), addr(1), addr(2), Amount::new(rate))
        .unwrap();

    let later = START + duration;
    assert_eq!(balance(&vault, addr(1), later), 5_000 - rate * duration);
    assert_eq!(balance(&vault, addr(2), later), rate * duration);
    assert_eq!(designated(&vault, addr(2), later), rate * duration);

    vault
        .extend_lock(&at(later), context(), START + 600)
        .unwrap();
    let end = START + 600;
    assert_eq!(balance(&vault, addr(2), end), rate * 600);
    assert_eq!(balance(&vault, addr(2), end + 1_000), rate * 600);

    let paid = vault.withdraw(&at(end), context(), addr(2)).unwrap();
    assert_eq!(paid, Amount::new(rate * 600));
    assert_eq!(vault.token().balance_of(&addr(2)), Amount::new(rate * 600));
}

#[test]
fn flow_requires_a_lock_and_enough_balance() {
    let mut vault = create_vault(10_000);
    vault
        .deposit(&at(START), context(), addr(1), Amount::new(100))
        .unwrap();
    assert_eq!(
        vault.flow(&at(START), context(), addr(1), addr(2), Amount::new(1)),
        Err(VaultError::LockRequired)
    );
    vault
        .lock(&at(START), context(), START + 50, START + 200)
        .unwrap();
    assert!(matches!(
        vault.flow(&at(START), context(), addr(1), addr(2), Amount::new(1)),
        Err(VaultError::InsufficientBalance { .. })
    ));
}

proptest! {
    #[test]
    fn prop_flows_conserve_context_total(
        rate in 1u64..20,
        elapsed in 0u64..400,
        deposit in 4_000u64..8_000,
    ) {
        let mut vault = create_vault(10_000);
        vault.deposit(&at(START), context(), addr(1), Amount::new(deposit)).unwrap();
        vault.lock(&at(START), context(), START + 200, START + 200).unwrap();
        vault.flow(&at(START), context(), addr(1), addr(2), Amount::new(rate)).unwrap();

        let now = START + elapsed;
        let total = balance(&vault, addr(1), now) + balance(&vault, addr(2), now);
        prop_assert_eq!(total, deposit);
        prop_assert_eq!(balance(&vault, addr(2), now), rate * elapsed.min(200));
    }
}
