//! End-to-end integration tests for the storage marketplace.
//!
//! Drives the complete lifecycle of storage requests through the ledger:
//! 1. Client escrows the price of a request
//! 2. Hosts deposit collateral and fill slots
//! 3. The request starts, then finishes, fails or expires
//! 4. Hosts are paid out, clients refunded, collateral returned

use std::sync::Arc;

use stow_core::{Address, Amount, ManualClock, RequestId, SlotId, Timestamp};
use stow_market::{
    Ask, Ledger, MarketError, MarketEvent, Marketplace, MarketplaceConfig, RequestState, SlotState,
    StorageRequest,
};
use stow_token::{Token, TokenLedger};

// ============================================================================
// Helper Functions
// ============================================================================

const START: Timestamp = 1_700_000_000;
const FUNDS: u64 = 1_000_000_000;
const PROOF: &[u8] = b"proof";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn addr(n: u8) -> Address {
    Address::new([n; 32])
}

fn market_address() -> Address {
    addr(200)
}

fn client() -> Address {
    addr(1)
}

fn host_a() -> Address {
    addr(2)
}

fn host_b() -> Address {
    addr(3)
}

fn ask() -> Ask {
    Ask {
        slots: 4,
        slot_size: 1 << 20,
        duration: 2 * 86_400,
        proof_probability: 4,
        reward: Amount::new(3),
        collateral: Amount::new(500),
        max_slot_loss: 1,
        expiry: 1800,
    }
}

fn request() -> StorageRequest {
    StorageRequest {
        client: client(),
        ask: ask(),
        content: [0xAB; 32],
        nonce: [1u8; 32],
    }
}

fn create_ledger(clock: &ManualClock) -> Ledger<TokenLedger> {
    init_tracing();
    let mut token = TokenLedger::new();
    for account in [client(), host_a(), host_b()] {
        token.mint(&account, Amount::new(FUNDS));
    }
    let marketplace =
        Marketplace::new(market_address(), MarketplaceConfig::default(), token).unwrap();
    Ledger::new(marketplace, Arc::new(clock.clone()))
}

async fn balance(ledger: &Ledger<TokenLedger>, owner: Address) -> u64 {
    ledger
        .view(|market, _| market.token().balance_of(&owner).units())
        .await
}

async fn request_storage(ledger: &Ledger<TokenLedger>, request: StorageRequest) -> RequestId {
    let price = request.price().unwrap();
    ledger
        .transact(request.client, |market, call| {
            let spender = market.address();
            market.token_mut().approve(&call.caller, &spender, price);
            market.request_storage(call, request)
        })
        .await
        .unwrap()
}

async fn deposit_collateral(ledger: &Ledger<TokenLedger>, host: Address, amount: u64) {
    ledger
        .transact(host, |market, call| {
            let spender = market.address();
            market
                .token_mut()
                .approve(&call.caller, &spender, Amount::new(amount));
            market.deposit_collateral(call, Amount::new(amount))
        })
        .await
        .unwrap();
}

async fn fill(
    ledger: &Ledger<TokenLedger>,
    host: Address,
    id: RequestId,
    index: u64,
) -> Result<SlotId, MarketError> {
    ledger
        .transact(host, |market, call| market.fill_slot(call, id, index, PROOF))
        .await
}

async fn payout(
    ledger: &Ledger<TokenLedger>,
    caller: Address,
    id: RequestId,
    index: u64,
) -> Result<Amount, MarketError> {
    ledger
        .transact(caller, |market, call| market.payout_slot(call, id, index))
        .await
}

async fn state(ledger: &Ledger<TokenLedger>, id: RequestId) -> RequestState {
    ledger
        .view(|market, now| market.state(&id, now))
        .await
        .unwrap()
}

/// Posts the default request and lets both hosts fill two slots each.
async fn started_request(ledger: &Ledger<TokenLedger>) -> RequestId {
    let id = request_storage(ledger, request()).await;
    let collateral = ask().collateral.units();
    deposit_collateral(ledger, host_a(), 2 * collateral).await;
    deposit_collateral(ledger, host_b(), 2 * collateral).await;
    for (host, index) in [(host_a(), 0), (host_a(), 1), (host_b(), 2), (host_b(), 3)] {
        fill(ledger, host, id, index).await.unwrap();
    }
    id
}

// ============================================================================
// Full Lifecycle
// ============================================================================

#[tokio::test]
async fn two_hosts_fill_four_slots_and_are_paid_once() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let price = request().price().unwrap().units();

    let id = started_request(&ledger).await;
    assert_eq!(state(&ledger, id).await, RequestState::Started);
    assert_eq!(balance(&ledger, client()).await, FUNDS - price);

    let events = ledger.transact(client(), |market, _| Ok(market.take_events())).await.unwrap();
    let fulfilled = events
        .iter()
        .filter(|event| matches!(event, MarketEvent::RequestFulfilled { .. }))
        .count();
    assert_eq!(fulfilled, 1);
    assert!(matches!(
        fill(&ledger, host_b(), id, 3).await,
        Err(MarketError::SlotAlreadyFilled)
    ));

    clock.set(START + ask().duration + 1);
    assert_eq!(state(&ledger, id).await, RequestState::Finished);

    let per_slot = ask().price_per_slot().unwrap().units();
    let collateral = ask().collateral.units();
    let a_before = balance(&ledger, host_a()).await;
    let b_before = balance(&ledger, host_b()).await;
    for index in 0..4 {
        assert_eq!(
            payout(&ledger, addr(99), id, index).await,
            Ok(Amount::new(per_slot))
        );
        assert_eq!(
            payout(&ledger, addr(99), id, index).await,
            Err(MarketError::AlreadyPaid)
        );
    }
    assert_eq!(balance(&ledger, host_a()).await, a_before + 2 * per_slot);
    assert_eq!(balance(&ledger, host_b()).await, b_before + 2 * per_slot);

    for host in [host_a(), host_b()] {
        let returned = ledger
            .transact(host, |market, call| market.withdraw_collateral(call))
            .await
            .unwrap();
        assert_eq!(returned, Amount::new(2 * collateral));
    }
    assert_eq!(balance(&ledger, client()).await, FUNDS - price);
    assert_eq!(
        balance(&ledger, host_a()).await + balance(&ledger, host_b()).await,
        2 * FUNDS + price
    );

    let custody = ledger
        .view(|market, _| market.token().balance_of(&market.vault().address()))
        .await;
    assert_eq!(custody, Amount::ZERO);
    assert!(ledger.view(|market, _| market.my_requests(&client())).await.is_empty());
}

#[tokio::test]
async fn unfilled_request_is_refunded_after_expiry() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let price = request().price().unwrap().units();
    let id = request_storage(&ledger, request()).await;

    clock.set(START + ask().expiry);
    let early = ledger
        .transact(client(), |market, call| market.withdraw_funds(call, id, None))
        .await;
    assert_eq!(early, Err(MarketError::RequestNotYetTimedOut));

    clock.set(START + ask().expiry + 1);
    assert_eq!(state(&ledger, id).await, RequestState::Cancelled);
    for stranger in [host_a(), host_b(), addr(42)] {
        let result = ledger
            .transact(stranger, |market, call| market.withdraw_funds(call, id, None))
            .await;
        assert_eq!(result, Err(MarketError::InvalidClientAddress));
    }

    let refunded = ledger
        .transact(client(), |market, call| market.withdraw_funds(call, id, None))
        .await
        .unwrap();
    assert_eq!(refunded, Amount::new(price));
    assert_eq!(balance(&ledger, client()).await, FUNDS);
}

#[tokio::test]
async fn partially_filled_request_pays_hosts_until_expiry() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let id = request_storage(&ledger, request()).await;
    deposit_collateral(&ledger, host_a(), ask().collateral.units()).await;

    clock.set(START + 600);
    let slot_id = fill(&ledger, host_a(), id, 0).await.unwrap();

    let cancelled_at = START + ask().expiry + 1;
    clock.set(cancelled_at);
    let slot_state = ledger.view(|market, now| market.slot_state(&slot_id, now)).await;
    assert_eq!(slot_state, SlotState::Cancelled);

    let before = balance(&ledger, host_a()).await;
    let paid = payout(&ledger, host_a(), id, 0).await.unwrap();
    let earned = ask().reward.units() * (ask().expiry - 600);
    assert_eq!(paid, Amount::new(earned));
    assert_eq!(balance(&ledger, host_a()).await, before + earned);

    let price = request().price().unwrap().units();
    assert_eq!(balance(&ledger, client()).await, FUNDS - price + (price - earned));
}

// ============================================================================
// Failure
// ============================================================================

#[tokio::test]
async fn losing_too_many_slots_fails_the_request() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let id = started_request(&ledger).await;

    let failed_at = START + ask().expiry + 500;
    clock.set(failed_at);
    for index in 0..=ask().max_slot_loss {
        let slot_id = SlotId::derive(&id, index);
        ledger
            .transact(host_a(), |market, call| market.free_slot(call, slot_id, None, None))
            .await
            .unwrap();
    }
    assert_eq!(state(&ledger, id).await, RequestState::Failed);
    assert!(ledger.view(|market, now| market.my_slots(&host_b(), now)).await.is_empty());

    let end = ledger.view(|market, now| market.request_end(&id, now)).await.unwrap();
    assert_eq!(end, failed_at - 1);
    clock.advance(1000);
    let again = ledger.view(|market, now| market.request_end(&id, now)).await.unwrap();
    assert_eq!(again, end);

    let earned = ask().reward.units() * (failed_at - START);
    for index in 2..4 {
        assert_eq!(payout(&ledger, host_b(), id, index).await, Ok(Amount::new(earned)));
    }

    let price = request().price().unwrap().units();
    assert_eq!(balance(&ledger, client()).await, FUNDS - 4 * earned);
    assert_eq!(
        balance(&ledger, host_a()).await + balance(&ledger, host_b()).await,
        2 * FUNDS + 4 * earned - 4 * ask().collateral.units()
    );
    assert!(price > 4 * earned);
    assert_eq!(ledger.view(|market, _| market.my_requests(&client())).await, vec![id]);
}

#[tokio::test]
async fn freeing_slots_before_start_keeps_request_new() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let id = request_storage(&ledger, request()).await;
    deposit_collateral(&ledger, host_a(), 4 * ask().collateral.units()).await;

    for index in 0..=ask().max_slot_loss {
        let slot_id = fill(&ledger, host_a(), id, index).await.unwrap();
        ledger
            .transact(host_a(), |market, call| market.free_slot(call, slot_id, None, None))
            .await
            .unwrap();
    }
    assert_eq!(state(&ledger, id).await, RequestState::New);
}

// ============================================================================
// Rewards Credited While Locked
// ============================================================================

#[tokio::test]
async fn early_free_credits_reward_claimable_after_request_ends() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let id = started_request(&ledger).await;

    clock.set(START + 60);
    let slot_id = SlotId::derive(&id, 0);
    let before = balance(&ledger, host_a()).await;
    ledger
        .transact(host_a(), |market, call| market.free_slot(call, slot_id, None, None))
        .await
        .unwrap();
    assert_eq!(balance(&ledger, host_a()).await, before);

    let early = ledger
        .transact(host_a(), |market, call| market.claim(call, id))
        .await;
    assert_eq!(early, Err(MarketError::ContractNotEnded));

    clock.set(START + ask().duration + 1);
    let claimed = ledger
        .transact(host_a(), |market, call| market.claim(call, id))
        .await
        .unwrap();
    assert_eq!(claimed, Amount::new(ask().reward.units() * 60));
    assert_eq!(balance(&ledger, host_a()).await, before + ask().reward.units() * 60);
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn failed_transaction_leaves_no_trace() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let id = request_storage(&ledger, request()).await;
    let height = ledger.height().await;

    let result = ledger
        .transact(host_a(), |market, call| {
            let spender = market.address();
            market
                .token_mut()
                .approve(&call.caller, &spender, Amount::new(100));
            market.deposit_collateral(call, Amount::new(100))?;
            market.fill_slot(call, id, 0, PROOF)
        })
        .await;

    assert!(matches!(result, Err(MarketError::InsufficientCollateral { .. })));
    assert_eq!(ledger.height().await, height);
    assert_eq!(balance(&ledger, host_a()).await, FUNDS);
    let collateral = ledger
        .view(|market, now| market.collateral_balance(&host_a(), now))
        .await;
    assert_eq!(collateral, Amount::ZERO);
}

#[tokio::test]
async fn request_state_is_read_from_time() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock);
    let id = request_storage(&ledger, request()).await;
    let height = ledger.height().await;

    assert_eq!(state(&ledger, id).await, RequestState::New);
    clock.set(START + ask().expiry + 1);
    assert_eq!(state(&ledger, id).await, RequestState::Cancelled);
    assert_eq!(ledger.height().await, height);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn marketplace_runs_with_configuration_from_json() {
    init_tracing();
    let config = MarketplaceConfig::from_json_str(
        r#"{ "proofs": { "period": 600, "timeout": 30 }, "collateral": { "slash_percentage": 25 } }"#,
    )
    .unwrap();
    assert_eq!(config.proofs.period, 600);
    assert_eq!(config.proofs.downtime, 64);
    assert_eq!(config.collateral.max_missed_proofs, 10);

    let mut token = TokenLedger::new();
    token.mint(&client(), Amount::new(FUNDS));
    let clock = ManualClock::new(START);
    let ledger = Ledger::new(
        Marketplace::new(market_address(), config, token).unwrap(),
        Arc::new(clock.clone()),
    );
    let id = request_storage(&ledger, request()).await;
    assert_eq!(state(&ledger, id).await, RequestState::New);

    let invalid = MarketplaceConfig::from_json_str(r#"{ "proofs": { "period": 0 } }"#);
    assert!(matches!(invalid, Err(MarketError::InvalidConfig(_))));
}
