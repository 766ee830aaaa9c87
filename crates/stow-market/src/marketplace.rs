//! The marketplace state machine.
//!
//! Funds layout in the vault (the marketplace is the controller):
//!
//! - request fund, context = request id:
//!   - request escrow account: escrow not yet assigned to a slot
//!   - per-slot escrow account: what the slot's host can still earn
//!   - payees (hosts, the client, chosen recipients): what was paid to them
//!     while the fund was locked
//! - host collateral, context derived from the host address:
//!   - host: free collateral
//!   - per-slot collateral account: collateral committed to a slot
//!
//! Escrow and collateral accounts live at derived addresses and are never
//! accepted as recipients, so a payee account only ever holds what is owed
//! to that payee. The request fund is locked until the request can no longer
//! be `New`, so money only leaves it through payouts once slots are settled.
//!
//! Operations check every precondition before their first write; a failed
//! operation leaves the marketplace unchanged.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stow_core::{Address, Amount, Call, Context, ProofId, RequestId, SlotId, Timestamp};
use stow_proofs::{Challenge, Period, Proofs, RandomnessSource};
use stow_token::Token;
use stow_vault::{Vault, VaultError};
use tracing::{debug, info, warn};

use crate::config::MarketplaceConfig;
use crate::error::{MarketError, Result};
use crate::events::MarketEvent;
use crate::request::StorageRequest;
use crate::state::{RequestState, SlotState};
use crate::verifier::{NonEmptyProof, ProofVerifier};

/// Public view of a slot that has (or had) a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Parent request.
    pub request_id: RequestId,
    /// Position within the request.
    pub index: u64,
    /// Host storing the slot.
    pub host: Address,
    /// Current state.
    pub state: SlotState,
    /// When the host filled the slot.
    pub filled_at: Timestamp,
}

#[derive(Debug, Clone)]
struct RequestContext {
    request: StorageRequest,
    state: RequestState,
    expires_at: Timestamp,
    ends_at: Timestamp,
    failed_at: Option<Timestamp>,
    /// Indices of slots currently filled.
    filled: BTreeSet<u64>,
    slots_freed: u64,
}

impl RequestContext {
    /// Stored state, advanced by the passage of time.
    fn state_at(&self, now: Timestamp) -> RequestState {
        match self.state {
            RequestState::New if now > self.expires_at => RequestState::Cancelled,
            RequestState::Started if now > self.ends_at => RequestState::Finished,
            state => state,
        }
    }

    fn end_at(&self, now: Timestamp) -> Timestamp {
        match self.state_at(now) {
            RequestState::New | RequestState::Started | RequestState::Finished => self.ends_at,
            RequestState::Cancelled => self.expires_at,
            RequestState::Failed => self
                .failed_at
                .unwrap_or(self.ends_at)
                .saturating_sub(1),
        }
    }

    fn transition(&mut self, target: RequestState) -> Result<()> {
        if self.state == target {
            return Ok(());
        }
        if !self.state.can_transition_to(&target) {
            return Err(MarketError::InvalidState);
        }
        self.state = target;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SlotRecord {
    request_id: RequestId,
    index: u64,
    host: Address,
    state: SlotState,
    filled_at: Timestamp,
}

fn fund_context(request_id: &RequestId) -> Context {
    Context::from(*request_id)
}

fn collateral_context(host: &Address) -> Context {
    Context::derive("collateral", host.as_bytes())
}

fn request_escrow(request_id: &RequestId) -> Address {
    Address::derive("request-escrow", request_id.as_bytes())
}

fn slot_escrow(slot_id: &SlotId) -> Address {
    Address::derive("slot-escrow", slot_id.as_bytes())
}

fn slot_collateral(slot_id: &SlotId) -> Address {
    Address::derive("slot-collateral", slot_id.as_bytes())
}

/// Where the escrow and collateral of a slot go when it leaves service.
/// Computed in full before any of it is moved.
#[derive(Debug, Clone, Copy)]
struct Settlement {
    request_id: RequestId,
    slot_id: SlotId,
    host: Address,
    /// Paid from the slot escrow to `payee`.
    reward: Amount,
    payee: Address,
    /// Rest of the slot escrow.
    unearned: Amount,
    /// Client refunded with `unearned` and the unassigned request escrow;
    /// without one, `unearned` goes back to the request escrow.
    refund_to: Option<Address>,
    unassigned: Amount,
    /// Collateral paid to `collateral_to`; the slashed rest is burned.
    returned: Amount,
    collateral_to: Address,
    slashed: Amount,
}

/// Storage requests, slots, collateral and payouts.
#[derive(Debug, Clone)]
pub struct Marketplace<T, V = NonEmptyProof> {
    address: Address,
    config: MarketplaceConfig,
    vault: Vault<T>,
    proofs: Proofs,
    verifier: V,
    requests: HashMap<RequestId, RequestContext>,
    slots: HashMap<SlotId, SlotRecord>,
    client_requests: HashMap<Address, Vec<RequestId>>,
    host_slots: HashMap<Address, BTreeSet<SlotId>>,
    events: Vec<MarketEvent>,
}

impl<T: Token> Marketplace<T> {
    /// Creates a marketplace acting as `address`, keeping custody in `token`.
    ///
    /// Clients and hosts approve `address` before requesting storage or
    /// depositing collateral.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidConfig`] if the configuration is invalid.
    pub fn new(address: Address, config: MarketplaceConfig, token: T) -> Result<Self> {
        Self::with_verifier(address, config, token, NonEmptyProof)
    }
}

impl<T: Token, V: ProofVerifier> Marketplace<T, V> {
    /// Creates a marketplace that checks proofs with `verifier`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidConfig`] if the configuration is invalid.
    pub fn with_verifier(
        address: Address,
        config: MarketplaceConfig,
        token: T,
        verifier: V,
    ) -> Result<Self> {
        config.validate()?;
        let vault = Vault::new(Address::derive("vault", address.as_bytes()), token);
        Ok(Self {
            address,
            config,
            vault,
            proofs: Proofs::new(config.proofs),
            verifier,
            requests: HashMap::new(),
            slots: HashMap::new(),
            client_requests: HashMap::new(),
            host_slots: HashMap::new(),
            events: Vec::new(),
        })
    }

    /// Draw proof requirements and challenges from `randomness`.
    #[must_use]
    pub fn with_randomness(mut self, randomness: Arc<dyn RandomnessSource>) -> Self {
        self.proofs = Proofs::with_randomness(self.config.proofs, randomness);
        self
    }

    /// Address clients and hosts approve.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// The vault holding escrow and collateral.
    #[must_use]
    pub const fn vault(&self) -> &Vault<T> {
        &self.vault
    }

    /// The proof scheduler.
    #[must_use]
    pub const fn proofs(&self) -> &Proofs {
        &self.proofs
    }

    /// The token ledger.
    #[must_use]
    pub const fn token(&self) -> &T {
        self.vault.token()
    }

    /// Mutable access to the token ledger, for approvals.
    pub fn token_mut(&mut self) -> &mut T {
        self.vault.token_mut()
    }

    /// Events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    // ---------------------------------------------------------------------
    // Collateral
    // ---------------------------------------------------------------------

    /// Pulls `amount` tokens from the caller into its free collateral.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InsufficientAllowance`] if the pull fails.
    pub fn deposit_collateral(&mut self, call: &Call, amount: Amount) -> Result<()> {
        let host = call.caller;
        self.pull(&host, collateral_context(&host), host, amount, call.now)?;
        debug!(host = %host, amount = %amount, "collateral deposited");
        Ok(())
    }

    /// Pays the caller's free collateral back to it.
    ///
    /// # Errors
    ///
    /// Fails only if the vault cannot pay out.
    pub fn withdraw_collateral(&mut self, call: &Call) -> Result<Amount> {
        let host = call.caller;
        let controller = self.controller(call.now);
        let amount = self
            .vault
            .withdraw(&controller, collateral_context(&host), host)?;
        debug!(host = %host, amount = %amount, "collateral withdrawn");
        Ok(amount)
    }

    /// Free collateral of `host`.
    #[must_use]
    pub fn collateral_balance(&self, host: &Address, now: Timestamp) -> Amount {
        self.vault
            .get_balance(&self.address, &collateral_context(host), host, now)
    }

    // ---------------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------------

    /// Posts a storage request and escrows its price.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidClientAddress`] if the caller is not the
    /// client, [`MarketError::InvalidAsk`],
    /// [`MarketError::RequestAlreadyExists`] or
    /// [`MarketError::InsufficientAllowance`].
    pub fn request_storage(&mut self, call: &Call, request: StorageRequest) -> Result<RequestId> {
        let now = call.now;
        if request.client != call.caller {
            return Err(MarketError::InvalidClientAddress);
        }
        request.ask.validate()?;
        let request_id = request.id();
        if self.requests.contains_key(&request_id) {
            return Err(MarketError::RequestAlreadyExists);
        }
        let price = request.price().ok_or(MarketError::Overflow)?;
        let expires_at = now
            .checked_add(request.ask.expiry)
            .ok_or(MarketError::Overflow)?;
        let ends_at = now
            .checked_add(request.ask.duration)
            .ok_or(MarketError::Overflow)?;

        let fund = fund_context(&request_id);
        self.pull(&request.client, fund, request_escrow(&request_id), price, now)?;
        let unlock = expires_at.saturating_add(1);
        let controller = self.controller(now);
        self.vault
            .lock(&controller, fund, unlock, ends_at.max(unlock))?;

        self.client_requests
            .entry(request.client)
            .or_default()
            .push(request_id);
        self.events.push(MarketEvent::StorageRequested {
            request_id,
            ask: request.ask,
        });
        info!(
            request_id = %request_id,
            client = %request.client,
            price = %price,
            slots = request.ask.slots,
            expires_at,
            ends_at,
            "storage requested"
        );
        self.requests.insert(
            request_id,
            RequestContext {
                request,
                state: RequestState::New,
                expires_at,
                ends_at,
                failed_at: None,
                filled: BTreeSet::new(),
                slots_freed: 0,
            },
        );
        Ok(request_id)
    }

    /// Fills slot `index` of a request with the caller as host.
    ///
    /// Commits the ask's collateral from the caller's free collateral,
    /// assigns the escrow the slot can earn until the request ends and starts
    /// the slot's proof schedule. Filling the last free slot of a new request
    /// starts it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UnknownRequest`],
    /// [`MarketError::RequestNotAcceptingProofs`], [`MarketError::InvalidSlot`],
    /// [`MarketError::SlotAlreadyFilled`],
    /// [`MarketError::InsufficientCollateral`] or [`MarketError::InvalidProof`],
    /// checked in that order.
    pub fn fill_slot(
        &mut self,
        call: &Call,
        request_id: RequestId,
        index: u64,
        proof: &[u8],
    ) -> Result<SlotId> {
        let now = call.now;
        let host = call.caller;
        let context = self
            .requests
            .get(&request_id)
            .ok_or(MarketError::UnknownRequest)?;
        if !context.state_at(now).accepts_proofs() {
            return Err(MarketError::RequestNotAcceptingProofs);
        }
        let ask = context.request.ask;
        let ends_at = context.ends_at;
        if index >= ask.slots {
            return Err(MarketError::InvalidSlot);
        }
        let slot_id = SlotId::derive(&request_id, index);
        if self.slots.contains_key(&slot_id) {
            return Err(MarketError::SlotAlreadyFilled);
        }
        let collateral = collateral_context(&host);
        let available = self
            .vault
            .get_account(&self.address, &collateral, &host, now)
            .undesignated();
        if available < ask.collateral {
            return Err(MarketError::InsufficientCollateral {
                required: ask.collateral,
                available,
            });
        }
        let proof_id = ProofId::from(slot_id);
        let challenge = self.proofs.get_challenge(&proof_id, now);
        if !self.verifier.verify(&slot_id, &challenge, proof) {
            return Err(MarketError::InvalidProof);
        }
        let escrow = ask
            .payout_for_duration(now, ends_at)
            .ok_or(MarketError::Overflow)?;
        let fund = fund_context(&request_id);
        let unassigned =
            self.vault
                .get_balance(&self.address, &fund, &request_escrow(&request_id), now);
        if unassigned < escrow {
            return Err(VaultError::InsufficientBalance {
                required: escrow,
                available: unassigned,
            }
            .into());
        }

        self.proofs
            .expect_proofs(proof_id, ask.proof_probability, ends_at - now, now)?;
        let controller = self.controller(now);
        self.vault.transfer(
            &controller,
            collateral,
            host,
            slot_collateral(&slot_id),
            ask.collateral,
        )?;
        self.vault.transfer(
            &controller,
            fund,
            request_escrow(&request_id),
            slot_escrow(&slot_id),
            escrow,
        )?;

        self.slots.insert(
            slot_id,
            SlotRecord {
                request_id,
                index,
                host,
                state: SlotState::Filled,
                filled_at: now,
            },
        );
        self.host_slots.entry(host).or_default().insert(slot_id);

        let context = self
            .requests
            .get_mut(&request_id)
            .ok_or(MarketError::UnknownRequest)?;
        context.filled.insert(index);
        self.events.push(MarketEvent::SlotFilled {
            request_id,
            index,
            slot_id,
        });
        info!(request_id = %request_id, slot_id = %slot_id, index, host = %host, "slot filled");

        if context.state == RequestState::New && context.filled.len() as u64 == ask.slots {
            context.transition(RequestState::Started)?;
            self.events
                .push(MarketEvent::RequestFulfilled { request_id });
            info!(request_id = %request_id, "request started");
        }
        Ok(slot_id)
    }

    /// Gives up a slot. Only the slot's host may free it.
    ///
    /// The reward earned so far goes to `reward_recipient` and the collateral,
    /// minus slashing for missed proofs, to `collateral_recipient`; both
    /// default to the host. Freeing more than `max_slot_loss` slots of a
    /// started request fails it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::SlotEmpty`],
    /// [`MarketError::SlotNotAcceptingProofs`],
    /// [`MarketError::InvalidSlotHost`] or
    /// [`MarketError::InvalidRecipient`] if a recipient is an escrow or
    /// collateral account.
    pub fn free_slot(
        &mut self,
        call: &Call,
        slot_id: SlotId,
        reward_recipient: Option<Address>,
        collateral_recipient: Option<Address>,
    ) -> Result<()> {
        let slot = self.accepting_slot(&slot_id, call.now)?;
        let host = slot.host;
        let request_id = slot.request_id;
        if host != call.caller {
            return Err(MarketError::InvalidSlotHost);
        }
        let reward_recipient = reward_recipient.unwrap_or(host);
        let collateral_recipient = collateral_recipient.unwrap_or(host);
        self.ensure_payee(&request_id, Some(&host), &reward_recipient)?;
        self.ensure_payee(&request_id, Some(&host), &collateral_recipient)?;
        self.release_slot(slot_id, Some(reward_recipient), collateral_recipient, call.now)
    }

    /// Pays the host of slot `index` once the request has ended, and returns
    /// its collateral. Anyone may trigger it.
    ///
    /// Escrow the slot did not earn goes back to the client, together with
    /// escrow the request never assigned to a slot.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::ContractNotEnded`] while the request runs,
    /// [`MarketError::SlotEmpty`] if the slot has no host and
    /// [`MarketError::AlreadyPaid`].
    pub fn payout_slot(&mut self, call: &Call, request_id: RequestId, index: u64) -> Result<Amount> {
        let now = call.now;
        let context = self
            .requests
            .get(&request_id)
            .ok_or(MarketError::UnknownRequest)?;
        let state = context.state_at(now);
        let service_end = match state {
            RequestState::Finished => context.ends_at,
            RequestState::Failed => context.failed_at.unwrap_or(now),
            RequestState::Cancelled => context.expires_at,
            RequestState::New | RequestState::Started => {
                return Err(MarketError::ContractNotEnded);
            }
        };
        if context.state != state && !context.state.can_transition_to(&state) {
            return Err(MarketError::InvalidState);
        }
        let ask = context.request.ask;
        let client = context.request.client;
        if index >= ask.slots {
            return Err(MarketError::InvalidSlot);
        }
        let slot_id = SlotId::derive(&request_id, index);
        let slot = self
            .slots
            .get(&slot_id)
            .cloned()
            .ok_or(MarketError::SlotEmpty)?;
        if slot.state == SlotState::Paid {
            return Err(MarketError::AlreadyPaid);
        }
        let earned = ask
            .payout_for_duration(slot.filled_at, service_end)
            .ok_or(MarketError::Overflow)?;

        let settlement = self.settlement(
            request_id,
            slot_id,
            slot.host,
            Some(slot.host),
            earned,
            slot.host,
            Some(client),
            now,
        );
        self.settle(&settlement, now)?;
        let paid = settlement.reward;
        let slashed = settlement.slashed;
        self.proofs.release(&ProofId::from(slot_id));

        if let Some(record) = self.slots.get_mut(&slot_id) {
            record.state = SlotState::Paid;
        }
        self.remove_host_slot(&slot.host, &slot_id);
        let context = self
            .requests
            .get_mut(&request_id)
            .ok_or(MarketError::UnknownRequest)?;
        context.filled.remove(&index);
        context.transition(state)?;
        if state == RequestState::Finished {
            self.remove_client_request(&client, &request_id);
        }

        self.events.push(MarketEvent::SlotPaid {
            request_id,
            slot_id,
        });
        info!(
            request_id = %request_id,
            slot_id = %slot_id,
            host = %slot.host,
            paid = %paid,
            slashed = %slashed,
            state = %state,
            "slot paid"
        );
        Ok(paid)
    }

    /// Refunds the escrow of a cancelled request to `recipient` (default: the
    /// client).
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::RequestNotYetTimedOut`] before expiry,
    /// [`MarketError::InvalidClientAddress`] if the caller is not the client,
    /// [`MarketError::InvalidState`] if the request started and
    /// [`MarketError::InvalidRecipient`] if `recipient` is an escrow account.
    pub fn withdraw_funds(
        &mut self,
        call: &Call,
        request_id: RequestId,
        recipient: Option<Address>,
    ) -> Result<Amount> {
        let now = call.now;
        let context = self
            .requests
            .get(&request_id)
            .ok_or(MarketError::UnknownRequest)?;
        if now <= context.expires_at {
            return Err(MarketError::RequestNotYetTimedOut);
        }
        let client = context.request.client;
        if call.caller != client {
            return Err(MarketError::InvalidClientAddress);
        }
        if context.state_at(now) != RequestState::Cancelled {
            return Err(MarketError::InvalidState);
        }

        let recipient = recipient.unwrap_or(client);
        self.ensure_payee(&request_id, None, &recipient)?;

        let fund = fund_context(&request_id);
        let escrow = request_escrow(&request_id);
        let controller = self.controller(now);
        let unassigned = self.vault.get_balance(&self.address, &fund, &escrow, now);
        self.vault
            .transfer(&controller, fund, escrow, recipient, unassigned)?;
        let amount = self.vault.withdraw(&controller, fund, recipient)?;

        if let Some(context) = self.requests.get_mut(&request_id) {
            context.state = RequestState::Cancelled;
        }
        let listed = self
            .client_requests
            .get(&client)
            .is_some_and(|requests| requests.contains(&request_id));
        self.remove_client_request(&client, &request_id);
        if listed || !amount.is_zero() {
            self.events
                .push(MarketEvent::RequestCancelled { request_id });
        }
        info!(request_id = %request_id, recipient = %recipient, amount = %amount, "funds withdrawn");
        Ok(amount)
    }

    /// Pays the caller what the request fund credited to it while it was
    /// locked. The client also receives escrow never assigned to a slot.
    /// Allowed once the request has ended and its fund is unlocked.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::ContractNotEnded`] while the request runs and
    /// [`VaultError::Locked`] if it failed before its fund unlocked.
    pub fn claim(&mut self, call: &Call, request_id: RequestId) -> Result<Amount> {
        let now = call.now;
        let context = self.context(&request_id)?;
        if !context.state_at(now).is_terminal() {
            return Err(MarketError::ContractNotEnded);
        }
        let client = context.request.client;
        let fund = fund_context(&request_id);
        if let Some(lock) = self
            .vault
            .get_lock(&self.address, &fund)
            .filter(|lock| lock.is_active(now))
        {
            return Err(VaultError::Locked {
                expiry: lock.expiry,
            }
            .into());
        }

        if call.caller == client {
            let escrow = request_escrow(&request_id);
            let unassigned = self.vault.get_balance(&self.address, &fund, &escrow, now);
            let controller = self.controller(now);
            self.vault
                .transfer(&controller, fund, escrow, client, unassigned)?;
        }
        let amount = self
            .vault
            .withdraw_by_recipient(call, self.address, fund)?;
        debug!(request_id = %request_id, recipient = %call.caller, amount = %amount, "claimed");
        Ok(amount)
    }

    // ---------------------------------------------------------------------
    // Proofs
    // ---------------------------------------------------------------------

    /// Submits a storage proof for the current period.
    ///
    /// # Errors
    ///
    /// Fails if the slot does not accept proofs, or with
    /// [`MarketError::Proofs`] if no proof is required, the proof is invalid
    /// or was already submitted.
    pub fn submit_proof(&mut self, call: &Call, slot_id: SlotId, proof: &[u8]) -> Result<()> {
        let now = call.now;
        self.accepting_slot(&slot_id, now)?;
        let proof_id = ProofId::from(slot_id);
        let challenge = self.proofs.get_challenge(&proof_id, now);
        let valid = self.verifier.verify(&slot_id, &challenge, proof);
        self.proofs.submit_proof(&proof_id, valid, now)?;
        self.events.push(MarketEvent::ProofSubmitted { slot_id });
        Ok(())
    }

    /// Marks the proof of a slot for `period` as missing. Anyone may call it.
    /// A slot reaching the missed-proof limit is freed; its host forfeits the
    /// reward and is slashed.
    ///
    /// # Errors
    ///
    /// Fails if the slot does not accept proofs, or with
    /// [`MarketError::Proofs`] if the proof cannot be marked as missing.
    pub fn mark_proof_as_missing(&mut self, call: &Call, slot_id: SlotId, period: Period) -> Result<()> {
        let now = call.now;
        let host = self.accepting_slot(&slot_id, now)?.host;
        let missed = self
            .proofs
            .mark_proof_as_missing(&ProofId::from(slot_id), period, now)?;
        self.events
            .push(MarketEvent::ProofMarkedMissing { slot_id, period });
        debug!(slot_id = %slot_id, period, missed, "proof missed");

        if missed >= self.config.collateral.max_missed_proofs {
            warn!(slot_id = %slot_id, host = %host, missed, "freeing slot after too many missed proofs");
            self.release_slot(slot_id, None, host, now)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// Fails unless the slot is filled and its request accepts proofs.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::SlotEmpty`] or
    /// [`MarketError::SlotNotAcceptingProofs`].
    pub fn accepts_proofs(&self, slot_id: &SlotId, now: Timestamp) -> Result<()> {
        self.accepting_slot(slot_id, now).map(|_| ())
    }

    /// State of a request at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UnknownRequest`].
    pub fn state(&self, request_id: &RequestId, now: Timestamp) -> Result<RequestState> {
        self.context(request_id).map(|context| context.state_at(now))
    }

    /// Returns true if the request expired before it started.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UnknownRequest`].
    pub fn is_cancelled(&self, request_id: &RequestId, now: Timestamp) -> Result<bool> {
        Ok(self.state(request_id, now)? == RequestState::Cancelled)
    }

    /// Returns true if the slot's request was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::SlotEmpty`] if the slot is not filled.
    pub fn is_slot_cancelled(&self, slot_id: &SlotId, now: Timestamp) -> Result<bool> {
        let slot = self.filled_slot(slot_id)?;
        self.is_cancelled(&slot.request_id, now)
    }

    /// When the request stops accepting proofs. In the past once the request
    /// is cancelled, finished or failed.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UnknownRequest`].
    pub fn request_end(&self, request_id: &RequestId, now: Timestamp) -> Result<Timestamp> {
        self.context(request_id).map(|context| context.end_at(now))
    }

    /// When the slot stops requiring proofs; the same for every slot of a
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::SlotEmpty`] if the slot has no host.
    pub fn proof_end(&self, slot_id: &SlotId, now: Timestamp) -> Result<Timestamp> {
        let slot = self.slots.get(slot_id).ok_or(MarketError::SlotEmpty)?;
        self.request_end(&slot.request_id, now)
    }

    /// Requests of `client` not yet settled.
    #[must_use]
    pub fn my_requests(&self, client: &Address) -> Vec<RequestId> {
        self.client_requests.get(client).cloned().unwrap_or_default()
    }

    /// Slots `host` fills whose request still accepts proofs.
    #[must_use]
    pub fn my_slots(&self, host: &Address, now: Timestamp) -> Vec<SlotId> {
        self.host_slots
            .get(host)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|slot_id| self.accepting_slot(slot_id, now).is_ok())
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The stored request.
    #[must_use]
    pub fn get_request(&self, request_id: &RequestId) -> Option<&StorageRequest> {
        self.requests.get(request_id).map(|context| &context.request)
    }

    /// The slot, if it has (or had) a host.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::SlotEmpty`].
    pub fn get_slot(&self, slot_id: &SlotId, now: Timestamp) -> Result<SlotInfo> {
        let slot = self.slots.get(slot_id).ok_or(MarketError::SlotEmpty)?;
        Ok(SlotInfo {
            request_id: slot.request_id,
            index: slot.index,
            host: slot.host,
            state: self.slot_state(slot_id, now),
            filled_at: slot.filled_at,
        })
    }

    /// State of a slot at `now`.
    #[must_use]
    pub fn slot_state(&self, slot_id: &SlotId, now: Timestamp) -> SlotState {
        let Some(slot) = self.slots.get(slot_id) else {
            return SlotState::Free;
        };
        if slot.state != SlotState::Filled {
            return slot.state;
        }
        match self.requests.get(&slot.request_id).map(|c| c.state_at(now)) {
            Some(RequestState::Finished) => SlotState::Finished,
            Some(RequestState::Cancelled) => SlotState::Cancelled,
            Some(RequestState::Failed) => SlotState::Failed,
            _ => SlotState::Filled,
        }
    }

    /// Host of a slot.
    #[must_use]
    pub fn get_host(&self, slot_id: &SlotId) -> Option<Address> {
        self.slots.get(slot_id).map(|slot| slot.host)
    }

    /// Proofs of a slot marked as missing.
    #[must_use]
    pub fn missing_proofs(&self, slot_id: &SlotId) -> u64 {
        self.proofs.missed(&ProofId::from(*slot_id))
    }

    /// Returns true if the slot's host must submit a proof now.
    #[must_use]
    pub fn is_proof_required(&self, slot_id: &SlotId, now: Timestamp) -> bool {
        self.accepting_slot(slot_id, now).is_ok()
            && self.proofs.is_proof_required(&ProofId::from(*slot_id), now)
    }

    /// The challenge a slot's proof must answer now.
    #[must_use]
    pub fn get_challenge(&self, slot_id: &SlotId, now: Timestamp) -> Challenge {
        self.proofs.get_challenge(&ProofId::from(*slot_id), now)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    const fn controller(&self, now: Timestamp) -> Call {
        Call::new(self.address, now)
    }

    fn context(&self, request_id: &RequestId) -> Result<&RequestContext> {
        self.requests
            .get(request_id)
            .ok_or(MarketError::UnknownRequest)
    }

    fn filled_slot(&self, slot_id: &SlotId) -> Result<&SlotRecord> {
        self.slots
            .get(slot_id)
            .filter(|slot| slot.state != SlotState::Failed)
            .ok_or(MarketError::SlotEmpty)
    }

    fn accepting_slot(&self, slot_id: &SlotId, now: Timestamp) -> Result<&SlotRecord> {
        let slot = self.filled_slot(slot_id)?;
        let accepts = self
            .requests
            .get(&slot.request_id)
            .is_some_and(|context| context.state_at(now).accepts_proofs());
        if !accepts {
            return Err(MarketError::SlotNotAcceptingProofs);
        }
        Ok(slot)
    }

    /// Moves `amount` from `from` into the vault under `recipient`.
    fn pull(
        &mut self,
        from: &Address,
        context: Context,
        recipient: Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<()> {
        let me = self.address;
        let custody = self.vault.address();
        let token = self.vault.token_mut();
        token
            .transfer_from(&me, from, &me, amount)
            .map_err(MarketError::InsufficientAllowance)?;
        token.approve(&me, &custody, amount);
        self.vault
            .deposit(&Call::new(me, now), context, recipient, amount)?;
        Ok(())
    }

    /// Hands `amount` (already credited to `payee` in the request fund)
    /// over: earmarked while the fund is locked, otherwise everything
    /// credited to `payee` is paid out.
    fn hand_over(
        &mut self,
        fund: Context,
        payee: Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<()> {
        let controller = self.controller(now);
        if self.vault.is_locked(&self.address, &fund, now) {
            if !amount.is_zero() {
                self.vault.designate(&controller, fund, payee, amount)?;
            }
        } else {
            self.vault.withdraw(&controller, fund, payee)?;
        }
        Ok(())
    }

    /// Fails if `recipient` is an escrow account of the request or a
    /// collateral account of `host`.
    fn ensure_payee(
        &self,
        request_id: &RequestId,
        host: Option<&Address>,
        recipient: &Address,
    ) -> Result<()> {
        let slots = self.context(request_id)?.request.ask.slots;
        let escrow = *recipient == request_escrow(request_id)
            || (0..slots).any(|index| slot_escrow(&SlotId::derive(request_id, index)) == *recipient);
        let collateral = host.is_some_and(|host| {
            self.slots
                .iter()
                .any(|(slot_id, slot)| slot.host == *host && slot_collateral(slot_id) == *recipient)
        });
        if escrow || collateral {
            warn!(request_id = %request_id, recipient = %recipient, "rejected marketplace account as recipient");
            return Err(MarketError::InvalidRecipient);
        }
        Ok(())
    }

    /// Splits the funds of a slot: up to `earned` of its escrow for `payee`
    /// (nothing without one), its collateral minus slashing for
    /// `collateral_to`.
    #[allow(clippy::too_many_arguments)]
    fn settlement(
        &self,
        request_id: RequestId,
        slot_id: SlotId,
        host: Address,
        payee: Option<Address>,
        earned: Amount,
        collateral_to: Address,
        refund_to: Option<Address>,
        now: Timestamp,
    ) -> Settlement {
        let fund = fund_context(&request_id);
        let held = self
            .vault
            .get_balance(&self.address, &fund, &slot_escrow(&slot_id), now);
        let reward = payee.map_or(Amount::ZERO, |_| earned.min(held));
        let unassigned = refund_to.map_or(Amount::ZERO, |_| {
            self.vault
                .get_balance(&self.address, &fund, &request_escrow(&request_id), now)
        });

        let committed = self.vault.get_balance(
            &self.address,
            &collateral_context(&host),
            &slot_collateral(&slot_id),
            now,
        );
        let missed = self.proofs.missed(&ProofId::from(slot_id));
        let slashed = self.config.collateral.slashed(committed, missed).min(committed);

        Settlement {
            request_id,
            slot_id,
            host,
            reward,
            payee: payee.unwrap_or(host),
            unearned: held.saturating_sub(reward),
            refund_to,
            unassigned,
            returned: committed.saturating_sub(slashed),
            collateral_to,
            slashed,
        }
    }

    /// Moves the funds of a slot as `settlement` says.
    fn settle(&mut self, settlement: &Settlement, now: Timestamp) -> Result<()> {
        let controller = self.controller(now);

        let collateral = collateral_context(&settlement.host);
        let committed = slot_collateral(&settlement.slot_id);
        self.vault.transfer(
            &controller,
            collateral,
            committed,
            settlement.collateral_to,
            settlement.returned,
        )?;
        if settlement.collateral_to != settlement.host {
            self.vault
                .withdraw(&controller, collateral, settlement.collateral_to)?;
        }
        if !settlement.slashed.is_zero() {
            self.vault.burn(&controller, collateral, committed)?;
            debug!(
                slot_id = %settlement.slot_id,
                host = %settlement.host,
                slashed = %settlement.slashed,
                "collateral slashed"
            );
        }

        let fund = fund_context(&settlement.request_id);
        let escrow = slot_escrow(&settlement.slot_id);
        if !settlement.reward.is_zero() {
            self.vault
                .transfer(&controller, fund, escrow, settlement.payee, settlement.reward)?;
            self.hand_over(fund, settlement.payee, settlement.reward, now)?;
        }
        match settlement.refund_to {
            Some(client) => {
                let refund = settlement
                    .unearned
                    .checked_add(settlement.unassigned)
                    .ok_or(MarketError::Overflow)?;
                self.vault
                    .transfer(&controller, fund, escrow, client, settlement.unearned)?;
                self.vault.transfer(
                    &controller,
                    fund,
                    request_escrow(&settlement.request_id),
                    client,
                    settlement.unassigned,
                )?;
                self.hand_over(fund, client, refund, now)?;
            }
            None => {
                self.vault.transfer(
                    &controller,
                    fund,
                    escrow,
                    request_escrow(&settlement.request_id),
                    settlement.unearned,
                )?;
            }
        }
        Ok(())
    }

    /// Takes a filled slot away from its host and settles its funds. The
    /// unearned escrow stays with the request for a refill.
    fn release_slot(
        &mut self,
        slot_id: SlotId,
        payee: Option<Address>,
        collateral_to: Address,
        now: Timestamp,
    ) -> Result<()> {
        let slot = self.slots.get(&slot_id).cloned().ok_or(MarketError::SlotEmpty)?;
        let request_id = slot.request_id;
        let context = self.context(&request_id)?;
        let ask = context.request.ask;
        let earned = ask
            .payout_for_duration(slot.filled_at, now)
            .ok_or(MarketError::Overflow)?;
        let fails = context.state == RequestState::Started
            && context.slots_freed.saturating_add(1) > ask.max_slot_loss;
        if fails && !context.state.can_transition_to(&RequestState::Failed) {
            return Err(MarketError::InvalidState);
        }

        let settlement =
            self.settlement(request_id, slot_id, slot.host, payee, earned, collateral_to, None, now);
        self.settle(&settlement, now)?;
        self.proofs.release(&ProofId::from(slot_id));
        self.slots.remove(&slot_id);
        self.remove_host_slot(&slot.host, &slot_id);

        if let Some(context) = self.requests.get_mut(&request_id) {
            context.filled.remove(&slot.index);
            context.slots_freed += 1;
        }

        self.events.push(MarketEvent::SlotFreed {
            request_id,
            slot_id,
        });
        info!(request_id = %request_id, slot_id = %slot_id, host = %slot.host, "slot freed");

        if fails {
            self.fail_request(&request_id, now)?;
        }
        Ok(())
    }

    /// Marks a request failed and takes every remaining slot out of service.
    /// The slots keep their funds until they are paid out.
    fn fail_request(&mut self, request_id: &RequestId, now: Timestamp) -> Result<()> {
        let context = self
            .requests
            .get_mut(request_id)
            .ok_or(MarketError::UnknownRequest)?;
        context.transition(RequestState::Failed)?;
        context.failed_at = Some(now);
        let remaining = std::mem::take(&mut context.filled);

        for index in remaining {
            let slot_id = SlotId::derive(request_id, index);
            let Some(slot) = self.slots.get_mut(&slot_id) else {
                continue;
            };
            slot.state = SlotState::Failed;
            let host = slot.host;
            self.remove_host_slot(&host, &slot_id);
        }

        self.events.push(MarketEvent::RequestFailed {
            request_id: *request_id,
        });
        info!(request_id = %request_id, "request failed");
        Ok(())
    }

    fn remove_host_slot(&mut self, host: &Address, slot_id: &SlotId) {
        if let Some(slots) = self.host_slots.get_mut(host) {
            slots.remove(slot_id);
            if slots.is_empty() {
                self.host_slots.remove(host);
            }
        }
    }

    fn remove_client_request(&mut self, client: &Address, request_id: &RequestId) {
        if let Some(requests) = self.client_requests.get_mut(client) {
            requests.retain(|id| id != request_id);
            if requests.is_empty() {
                self.client_requests.remove(client);
            }
        }
    }
}
