//! Integration tests for storage proofs in the marketplace.
//!
//! Tests the proof lifecycle of a filled slot:
//! 1. Proof requirements drawn per period from a randomness source
//! 2. Hosts answering challenges through the proof verifier
//! 3. Watchdogs marking missed proofs within the validation window
//! 4. Slashing and forced freeing after too many missed proofs

use std::sync::Arc;

use stow_core::{Address, Amount, ManualClock, ProofId, RequestId, SlotId, Timestamp};
use stow_market::{
    Ask, CollateralConfig, Ledger, MarketError, MarketEvent, Marketplace, MarketplaceConfig,
    ProofVerifier, RequestState, SlotState, StorageRequest,
};
use stow_proofs::{Challenge, ProofConfig, ProofError, Proofs, RandomnessSource};
use stow_token::{Token, TokenLedger};

// ============================================================================
// Helper Functions
// ============================================================================

const START: Timestamp = 1_700_000_000;
const PERIOD: u64 = 600;
const TIMEOUT: u64 = 30;
const COLLATERAL: u64 = 1_000;

/// Accepts a proof only if it echoes the challenge.
#[derive(Debug, Clone, Copy)]
struct EchoVerifier;

impl ProofVerifier for EchoVerifier {
    fn verify(&self, _slot: &SlotId, challenge: &Challenge, proof: &[u8]) -> bool {
        proof == challenge.as_slice()
    }
}

/// Randomness that is the same for every period.
#[derive(Debug)]
struct FixedBeacon([u8; 32]);

impl RandomnessSource for FixedBeacon {
    fn randomness(&self, _period: u64) -> [u8; 32] {
        self.0
    }
}

fn addr(n: u8) -> Address {
    Address::new([n; 32])
}

fn client() -> Address {
    addr(1)
}

fn host() -> Address {
    addr(2)
}

fn watchdog() -> Address {
    addr(3)
}

fn config(max_missed_proofs: u64) -> MarketplaceConfig {
    MarketplaceConfig::default()
        .with_proofs(
            ProofConfig::default()
                .with_period(PERIOD)
                .with_timeout(TIMEOUT)
                .with_downtime(16),
        )
        .with_collateral(CollateralConfig {
            slash_percentage: 25,
            max_missed_proofs,
        })
}

fn request(proof_probability: u64) -> StorageRequest {
    StorageRequest {
        client: client(),
        ask: Ask {
            slots: 1,
            slot_size: 4096,
            duration: 86_400,
            proof_probability,
            reward: Amount::new(2),
            collateral: Amount::new(COLLATERAL),
            max_slot_loss: 0,
            expiry: 3600,
        },
        content: [9u8; 32],
        nonce: [0u8; 32],
    }
}

type TestLedger = Ledger<TokenLedger, EchoVerifier>;

fn create_ledger(clock: &ManualClock, max_missed_proofs: u64) -> TestLedger {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut token = TokenLedger::new();
    token.mint(&client(), Amount::new(10_000_000));
    token.mint(&host(), Amount::new(10_000_000));
    let marketplace =
        Marketplace::with_verifier(addr(200), config(max_missed_proofs), token, EchoVerifier)
            .unwrap()
            .with_randomness(Arc::new(FixedBeacon([0x5A; 32])));
    Ledger::new(marketplace, Arc::new(clock.clone()))
}

/// Posts a one-slot request and fills it with the host at `START`.
async fn filled_slot(ledger: &TestLedger, proof_probability: u64) -> (RequestId, SlotId) {
    let request = request(proof_probability);
    let price = request.price().unwrap();
    let id = ledger
        .transact(client(), |market, call| {
            let spender = market.address();
            market.token_mut().approve(&call.caller, &spender, price);
            market.request_storage(call, request)
        })
        .await
        .unwrap();
    let slot_id = ledger
        .transact(host(), |market, call| {
            let spender = market.address();
            market
                .token_mut()
                .approve(&call.caller, &spender, Amount::new(COLLATERAL));
            market.deposit_collateral(call, Amount::new(COLLATERAL))?;
            let challenge = market.get_challenge(&SlotId::derive(&id, 0), call.now);
            market.fill_slot(call, id, 0, &challenge)
        })
        .await
        .unwrap();
    (id, slot_id)
}

/// First time at or after `from` (stepping by whole periods) at which the
/// slot requires a proof.
async fn next_required(ledger: &TestLedger, slot_id: SlotId, from: Timestamp) -> Timestamp {
    ledger
        .view(|market, _| {
            let mut time = from;
            while !market.is_proof_required(&slot_id, time) {
                time += PERIOD;
                assert!(time < START + 86_400, "no proof required before the request ends");
            }
            time
        })
        .await
}

async fn mark_missing(
    ledger: &TestLedger,
    slot_id: SlotId,
    period: u64,
) -> Result<(), MarketError> {
    ledger
        .transact(watchdog(), |market, call| {
            market.mark_proof_as_missing(call, slot_id, period)
        })
        .await
}

// ============================================================================
// Submitting Proofs
// ============================================================================

#[tokio::test]
async fn host_answers_the_challenge_when_a_proof_is_required() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock, 10);
    let (_, slot_id) = filled_slot(&ledger, 2).await;

    let not_required = ledger
        .transact(host(), |market, call| market.submit_proof(call, slot_id, b"x"))
        .await;
    assert_eq!(
        not_required,
        Err(MarketError::Proofs(ProofError::ProofNotRequired))
    );

    let required_at = next_required(&ledger, slot_id, START).await;
    clock.set(required_at);

    let wrong = ledger
        .transact(host(), |market, call| market.submit_proof(call, slot_id, &[0u8; 32]))
        .await;
    assert_eq!(wrong, Err(MarketError::Proofs(ProofError::InvalidProof)));

    let events = ledger
        .transact(host(), |market, call| {
            market.take_events();
            let challenge = market.get_challenge(&slot_id, call.now);
            market.submit_proof(call, slot_id, &challenge)?;
            Ok(market.take_events())
        })
        .await
        .unwrap();
    assert_eq!(events, vec![MarketEvent::ProofSubmitted { slot_id }]);

    let again = ledger
        .transact(host(), |market, call| {
            let challenge = market.get_challenge(&slot_id, call.now);
            market.submit_proof(call, slot_id, &challenge)
        })
        .await;
    assert_eq!(again, Err(MarketError::Proofs(ProofError::AlreadySubmitted)));

    let period = ledger.view(|market, now| market.proofs().period_of(now)).await;
    clock.set(ledger.view(|market, _| market.proofs().period_end(period)).await);
    assert_eq!(
        mark_missing(&ledger, slot_id, period).await,
        Err(MarketError::Proofs(ProofError::AlreadySubmitted))
    );
}

// ============================================================================
// Missed Proofs
// ============================================================================

#[tokio::test]
async fn missed_proof_can_be_marked_only_within_the_validation_window() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock, 10);
    let (_, slot_id) = filled_slot(&ledger, 1).await;

    let required_at = next_required(&ledger, slot_id, START).await;
    clock.set(required_at);
    let period = ledger.view(|market, now| market.proofs().period_of(now)).await;
    let period_end = ledger.view(|market, _| market.proofs().period_end(period)).await;

    assert_eq!(
        mark_missing(&ledger, slot_id, period).await,
        Err(MarketError::Proofs(ProofError::PeriodNotEnded { period_end }))
    );

    clock.set(period_end + TIMEOUT - 1);
    mark_missing(&ledger, slot_id, period).await.unwrap();
    assert_eq!(
        mark_missing(&ledger, slot_id, period).await,
        Err(MarketError::Proofs(ProofError::AlreadyMarkedMissing))
    );
    let missed = ledger.view(|market, _| market.missing_proofs(&slot_id)).await;
    assert_eq!(missed, 1);

    clock.set(period_end + TIMEOUT);
    assert_eq!(
        mark_missing(&ledger, slot_id, period).await,
        Err(MarketError::Proofs(ProofError::ValidationTimedOut {
            deadline: period_end + TIMEOUT
        }))
    );
}

#[tokio::test]
async fn too_many_missed_proofs_free_the_slot_and_slash_collateral() {
    let clock = ManualClock::new(START);
    let ledger = create_ledger(&clock, 2);
    let (id, slot_id) = filled_slot(&ledger, 1).await;
    let host_before = ledger
        .view(|market, _| market.token().balance_of(&host()))
        .await;

    let mut time = START;
    for _ in 0..2 {
        time = next_required(&ledger, slot_id, time).await;
        let period = ledger.view(|market, _| market.proofs().period_of(time)).await;
        time = ledger.view(|market, _| market.proofs().period_end(period)).await;
        clock.set(time);
        mark_missing(&ledger, slot_id, period).await.unwrap();
    }

    let (host_of_slot, slot_state, state, collateral, burned) = ledger
        .view(|market, now| {
            (
                market.get_host(&slot_id),
                market.slot_state(&slot_id, now),
                market.state(&id, now),
                market.collateral_balance(&host(), now),
                market.token().balance_of(&Address::BURN),
            )
        })
        .await;
    assert_eq!(host_of_slot, None);
    assert_eq!(slot_state, SlotState::Free);
    assert_eq!(state, Ok(RequestState::Failed));
    assert_eq!(collateral, Amount::new(COLLATERAL / 2));
    assert_eq!(burned, Amount::new(COLLATERAL / 2));

    let host_after = ledger
        .view(|market, _| market.token().balance_of(&host()))
        .await;
    assert_eq!(host_after, host_before);
    let missed = ledger.view(|market, _| market.missing_proofs(&slot_id)).await;
    assert_eq!(missed, 0);
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn proofs_are_never_required_in_first_or_last_period_or_after_end() {
    let config = ProofConfig::default().with_period(PERIOD).with_downtime(0);
    let mut proofs = Proofs::with_randomness(config, Arc::new(FixedBeacon([1u8; 32])));
    let id = ProofId::new([7u8; 32]);
    let start = START + 123;
    let end = start + 20 * PERIOD;
    proofs.expect_proofs(id, 1, end - start, start).unwrap();

    let first = proofs.period_of(start);
    let last = proofs.period_of(end);
    for time in (start..end + 5 * PERIOD).step_by(60) {
        let period = proofs.period_of(time);
        let required = proofs.is_proof_required(&id, time);
        if period == first || period >= last {
            assert!(!required, "required at {time} in period {period}");
        }
    }
    assert!((first + 1..last).all(|period| proofs.is_required_in(&id, period)));
}

#[test]
fn requirement_is_stable_within_a_period() {
    let proofs_config = ProofConfig::default().with_period(PERIOD);
    let mut proofs = Proofs::new(proofs_config);
    let id = ProofId::new([3u8; 32]);
    proofs.expect_proofs(id, 3, 86_400, START).unwrap();

    for period in proofs.period_of(START)..proofs.period_of(START + 86_400) {
        let begin = period * PERIOD;
        let expected = proofs.is_proof_required(&id, begin);
        for offset in [1, PERIOD / 2, PERIOD - 1] {
            assert_eq!(proofs.is_proof_required(&id, begin + offset), expected);
        }
        assert_eq!(proofs.get_challenge(&id, begin), proofs.get_challenge(&id, begin + PERIOD - 1));
    }
}
