//! The vault ledger.
//!
//! Balances are stored flat under `(controller, context, recipient)`. Locks
//! and flows are stored per `(controller, context)`. Flows are never ticked:
//! every operation that touches a context first settles its flows up to the
//! call time, and views project the same settlement without storing it.

use std::collections::HashMap;

use stow_core::{Address, Amount, Call, Context, Timestamp};
use stow_token::Token;
use tracing::debug;

use crate::account::{Balance, Flow, Lock};
use crate::error::{Result, VaultError};

type AccountKey = (Address, Context, Address);
type FundKey = (Address, Context);

/// Lock and flows shared by every recipient of a context.
#[derive(Debug, Clone, Default)]
struct Fund {
    lock: Option<Lock>,
    flows: Vec<Flow>,
}

impl Fund {
    /// Tokens `sender` has promised to its flows from `now` until the lock
    /// maximum.
    fn committed(&self, sender: &Address, now: Timestamp) -> Option<Amount> {
        let Some(lock) = self.lock else {
            return Some(Amount::ZERO);
        };
        let rate = self
            .flows
            .iter()
            .filter(|flow| flow.sender == *sender)
            .try_fold(Amount::ZERO, |total, flow| total.checked_add(flow.rate))?;
        rate.checked_mul(lock.maximum.saturating_sub(now))
    }
}

/// Multi-tenant token escrow.
///
/// The vault owns the token ledger it keeps custody in; tokens held by the
/// vault's own address back every balance of every controller.
#[derive(Debug, Clone)]
pub struct Vault<T> {
    address: Address,
    token: T,
    accounts: HashMap<AccountKey, Balance>,
    funds: HashMap<FundKey, Fund>,
}

impl<T: Token> Vault<T> {
    /// Creates a vault holding custody under `address`.
    #[must_use]
    pub fn new(address: Address, token: T) -> Self {
        Self {
            address,
            token,
            accounts: HashMap::new(),
            funds: HashMap::new(),
        }
    }

    /// The custody address. Depositors approve this address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The underlying token ledger.
    #[must_use]
    pub const fn token(&self) -> &T {
        &self.token
    }

    /// Mutable access to the underlying token ledger.
    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Pulls `amount` tokens from the caller and credits them to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::TransferFailed`] if the token pull fails.
    pub fn deposit(
        &mut self,
        call: &Call,
        context: Context,
        recipient: Address,
        amount: Amount,
    ) -> Result<()> {
        let key = (call.caller, context, recipient);
        let mut account = self.accounts.get(&key).copied().unwrap_or_default();
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;

        let vault = self.address;
        self.token
            .transfer_from(&vault, &call.caller, &vault, amount)
            .map_err(VaultError::TransferFailed)?;
        self.accounts.insert(key, account);

        debug!(
            controller = %call.caller,
            context = %context,
            recipient = %recipient,
            amount = %amount,
            "deposited"
        );
        Ok(())
    }

    /// Pays the whole balance of `recipient` out to `recipient` and deletes
    /// the context lock. Returns the amount paid.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`] while the context lock is active.
    pub fn withdraw(&mut self, call: &Call, context: Context, recipient: Address) -> Result<Amount> {
        self.withdraw_to(call.caller, context, recipient, call.now)
    }

    /// Lets a recipient (the caller) withdraw what `controller` holds for
    /// it. Same rules as [`Vault::withdraw`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`] while the context lock is active.
    pub fn withdraw_by_recipient(
        &mut self,
        call: &Call,
        controller: Address,
        context: Context,
    ) -> Result<Amount> {
        self.withdraw_to(controller, context, call.caller, call.now)
    }

    /// Sends the whole balance of `recipient` to [`Address::BURN`]. Allowed
    /// under an active lock. Outgoing flows of `recipient` stop.
    ///
    /// # Errors
    ///
    /// Fails only if settlement arithmetic overflows.
    pub fn burn(&mut self, call: &Call, context: Context, recipient: Address) -> Result<Amount> {
        let controller = call.caller;
        self.settle(&controller, &context, call.now)?;

        let removed = self.accounts.remove(&(controller, context, recipient));
        let amount = removed.map(|account| account.balance).unwrap_or_default();
        let dropped = self
            .funds
            .get_mut(&(controller, context))
            .map(|fund| {
                let before = fund.flows.clone();
                fund.flows.retain(|flow| flow.sender != recipient);
                before
            });

        if let Err(err) = self.pay(&Address::BURN, amount) {
            if let Some(account) = removed {
                self.accounts.insert((controller, context, recipient), account);
            }
            if let (Some(flows), Some(fund)) = (dropped, self.funds.get_mut(&(controller, context))) {
                fund.flows = flows;
            }
            return Err(err);
        }

        debug!(
            controller = %controller,
            context = %context,
            recipient = %recipient,
            amount = %amount,
            "burned"
        );
        Ok(amount)
    }

    /// Moves `amount` between two recipients of the same context.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InsufficientBalance`] if `from` has less than
    /// `amount` that is neither designated nor committed to flows.
    pub fn transfer(
        &mut self,
        call: &Call,
        context: Context,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<()> {
        let controller = call.caller;
        self.settle(&controller, &context, call.now)?;
        self.ensure_available(&controller, &context, &from, amount, call.now)?;
        if from == to || amount.is_zero() {
            return Ok(());
        }

        let from_key = (controller, context, from);
        let to_key = (controller, context, to);
        let mut sender = self.accounts.get(&from_key).copied().unwrap_or_default();
        let mut receiver = self.accounts.get(&to_key).copied().unwrap_or_default();
        sender.balance = sender.balance.checked_sub(amount).ok_or(VaultError::Overflow)?;
        receiver.balance = receiver
            .balance
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        self.accounts.insert(from_key, sender);
        self.accounts.insert(to_key, receiver);

        debug!(
            controller = %controller,
            context = %context,
            from = %from,
            to = %to,
            amount = %amount,
            "transferred"
        );
        Ok(())
    }

    /// Earmarks `amount` of `recipient`'s balance for `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InsufficientBalance`] if less than `amount` is
    /// available.
    pub fn designate(
        &mut self,
        call: &Call,
        context: Context,
        recipient: Address,
        amount: Amount,
    ) -> Result<()> {
        let controller = call.caller;
        self.settle(&controller, &context, call.now)?;
        self.ensure_available(&controller, &context, &recipient, amount, call.now)?;

        let key = (controller, context, recipient);
        let mut account = self.accounts.get(&key).copied().unwrap_or_default();
        account.designated = account
            .designated
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        self.accounts.insert(key, account);

        debug!(
            controller = %controller,
            context = %context,
            recipient = %recipient,
            amount = %amount,
            "designated"
        );
        Ok(())
    }

    /// Locks the context until `expiry`, extendable up to `maximum`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AlreadyLocked`] if the context has a lock and
    /// [`VaultError::ExpiryPastMaximum`] if `expiry > maximum`.
    pub fn lock(
        &mut self,
        call: &Call,
        context: Context,
        expiry: Timestamp,
        maximum: Timestamp,
    ) -> Result<()> {
        let fund = self.funds.entry((call.caller, context)).or_default();
        if fund.lock.is_some() {
            return Err(VaultError::AlreadyLocked);
        }
        if expiry > maximum {
            return Err(VaultError::ExpiryPastMaximum { expiry, maximum });
        }
        fund.lock = Some(Lock { expiry, maximum });

        debug!(
            controller = %call.caller,
            context = %context,
            expiry,
            maximum,
            "locked"
        );
        Ok(())
    }

    /// Moves the lock expiry forward.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::LockRequired`] without an active lock,
    /// [`VaultError::InvalidExpiry`] if `expiry` is before the current expiry
    /// and [`VaultError::ExpiryPastMaximum`] if it is past the maximum.
    pub fn extend_lock(&mut self, call: &Call, context: Context, expiry: Timestamp) -> Result<()> {
        let lock = self
            .funds
            .get_mut(&(call.caller, context))
            .and_then(|fund| fund.lock.as_mut())
            .filter(|lock| lock.is_active(call.now))
            .ok_or(VaultError::LockRequired)?;
        if expiry < lock.expiry {
            return Err(VaultError::InvalidExpiry {
                current: lock.expiry,
                requested: expiry,
            });
        }
        if expiry > lock.maximum {
            return Err(VaultError::ExpiryPastMaximum {
                expiry,
                maximum: lock.maximum,
            });
        }
        lock.expiry = expiry;

        debug!(controller = %call.caller, context = %context, expiry, "lock extended");
        Ok(())
    }

    /// Starts streaming `rate` tokens per second from `sender` to
    /// `receiver` while the lock is active.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::LockRequired`] without an active lock and
    /// [`VaultError::InsufficientBalance`] if the sender cannot cover all its
    /// flows until the lock maximum.
    pub fn flow(
        &mut self,
        call: &Call,
        context: Context,
        sender: Address,
        receiver: Address,
        rate: Amount,
    ) -> Result<()> {
        let controller = call.caller;
        let now = call.now;
        let lock = self
            .funds
            .get(&(controller, context))
            .and_then(|fund| fund.lock)
            .filter(|lock| lock.is_active(now))
            .ok_or(VaultError::LockRequired)?;
        if rate.is_zero() {
            return Ok(());
        }
        self.settle(&controller, &context, now)?;

        let fund = self.funds.entry((controller, context)).or_default();
        let committed = fund.committed(&sender, now).ok_or(VaultError::Overflow)?;
        let required = rate
            .checked_mul(lock.maximum.saturating_sub(now))
            .and_then(|extra| extra.checked_add(committed))
            .ok_or(VaultError::Overflow)?;
        let available = self
            .accounts
            .get(&(controller, context, sender))
            .map(Balance::undesignated)
            .unwrap_or_default();
        if required > available {
            return Err(VaultError::InsufficientBalance {
                required,
                available,
            });
        }

        fund.flows.push(Flow {
            sender,
            receiver,
            rate,
            settled_at: now,
        });

        debug!(
            controller = %controller,
            context = %context,
            sender = %sender,
            receiver = %receiver,
            rate = %rate,
            "flow started"
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// Balance of `recipient` at `now`, flows included.
    #[must_use]
    pub fn get_balance(
        &self,
        controller: &Address,
        context: &Context,
        recipient: &Address,
        now: Timestamp,
    ) -> Amount {
        self.get_account(controller, context, recipient, now).balance
    }

    /// Designated balance of `recipient` at `now`, flows included.
    #[must_use]
    pub fn get_designated_balance(
        &self,
        controller: &Address,
        context: &Context,
        recipient: &Address,
        now: Timestamp,
    ) -> Amount {
        self.get_account(controller, context, recipient, now).designated
    }

    /// Full balance record of `recipient` at `now`.
    #[must_use]
    pub fn get_account(
        &self,
        controller: &Address,
        context: &Context,
        recipient: &Address,
        now: Timestamp,
    ) -> Balance {
        let stored = self
            .accounts
            .get(&(*controller, *context, *recipient))
            .copied()
            .unwrap_or_default();
        self.settlement(controller, context, now)
            .ok()
            .and_then(|(updates, _)| {
                updates
                    .into_iter()
                    .find_map(|(address, account)| (address == *recipient).then_some(account))
            })
            .unwrap_or(stored)
    }

    /// The lock of a context, if any.
    #[must_use]
    pub fn get_lock(&self, controller: &Address, context: &Context) -> Option<Lock> {
        self.funds
            .get(&(*controller, *context))
            .and_then(|fund| fund.lock)
    }

    /// Returns true while the context lock is active at `now`.
    #[must_use]
    pub fn is_locked(&self, controller: &Address, context: &Context, now: Timestamp) -> bool {
        self.get_lock(controller, context)
            .is_some_and(|lock| lock.is_active(now))
    }

    /// Flows of a context that have not run out yet, as last settled.
    #[must_use]
    pub fn get_flows(&self, controller: &Address, context: &Context) -> &[Flow] {
        self.funds
            .get(&(*controller, *context))
            .map(|fund| fund.flows.as_slice())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn withdraw_to(
        &mut self,
        controller: Address,
        context: Context,
        recipient: Address,
        now: Timestamp,
    ) -> Result<Amount> {
        let fund_key = (controller, context);
        let lock = self.funds.get(&fund_key).and_then(|fund| fund.lock);
        if let Some(lock) = lock.filter(|lock| lock.is_active(now)) {
            return Err(VaultError::Locked {
                expiry: lock.expiry,
            });
        }
        self.settle(&controller, &context, now)?;

        let account_key = (controller, context, recipient);
        let removed = self.accounts.remove(&account_key);
        let fund = self.funds.remove(&fund_key);
        let amount = removed.map(|account| account.balance).unwrap_or_default();

        // Bookkeeping is final before tokens leave custody.
        if let Err(err) = self.pay(&recipient, amount) {
            if let Some(account) = removed {
                self.accounts.insert(account_key, account);
            }
            if let Some(fund) = fund {
                self.funds.insert(fund_key, fund);
            }
            return Err(err);
        }

        debug!(
            controller = %controller,
            context = %context,
            recipient = %recipient,
            amount = %amount,
            "withdrawn"
        );
        Ok(amount)
    }

    fn pay(&mut self, to: &Address, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let vault = self.address;
        self.token
            .transfer(&vault, to, amount)
            .map_err(VaultError::TransferFailed)
    }

    fn ensure_available(
        &self,
        controller: &Address,
        context: &Context,
        recipient: &Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<()> {
        let undesignated = self
            .accounts
            .get(&(*controller, *context, *recipient))
            .map(Balance::undesignated)
            .unwrap_or_default();
        let committed = self
            .funds
            .get(&(*controller, *context))
            .map_or(Some(Amount::ZERO), |fund| fund.committed(recipient, now))
            .ok_or(VaultError::Overflow)?;
        let available = undesignated.saturating_sub(committed);
        if amount > available {
            return Err(VaultError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Computes the balances touched by settling the context's flows up to
    /// `now`, and the time the flows end up settled at.
    ///
    /// Incoming amounts are credited before outgoing ones are debited, so the
    /// result does not depend on the order the flows were started in.
    fn settlement(
        &self,
        controller: &Address,
        context: &Context,
        now: Timestamp,
    ) -> Result<(Vec<(Address, Balance)>, Timestamp)> {
        let Some(fund) = self.funds.get(&(*controller, *context)) else {
            return Ok((Vec::new(), now));
        };
        let Some(lock) = fund.lock else {
            return Ok((Vec::new(), now));
        };
        let until = now.min(lock.expiry);

        let mut incoming: HashMap<Address, Amount> = HashMap::new();
        let mut outgoing: HashMap<Address, Amount> = HashMap::new();
        for flow in &fund.flows {
            let amount = flow.accrued(until).ok_or(VaultError::Overflow)?;
            if amount.is_zero() {
                continue;
            }
            let received = incoming.entry(flow.receiver).or_default();
            *received = received.checked_add(amount).ok_or(VaultError::Overflow)?;
            let sent = outgoing.entry(flow.sender).or_default();
            *sent = sent.checked_add(amount).ok_or(VaultError::Overflow)?;
        }

        let mut touched: Vec<Address> = incoming.keys().chain(outgoing.keys()).copied().collect();
        touched.sort_unstable();
        touched.dedup();

        let mut updates = Vec::with_capacity(touched.len());
        for address in touched {
            let mut account = self
                .accounts
                .get(&(*controller, *context, address))
                .copied()
                .unwrap_or_default();
            let received = incoming.get(&address).copied().unwrap_or_default();
            let sent = outgoing.get(&address).copied().unwrap_or_default();
            let credited = account
                .balance
                .checked_add(received)
                .ok_or(VaultError::Overflow)?;
            account.designated = account
                .designated
                .checked_add(received)
                .ok_or(VaultError::Overflow)?;
            account.balance = credited
                .checked_sub(sent)
                .filter(|balance| *balance >= account.designated)
                .ok_or(VaultError::InsufficientBalance {
                    required: sent,
                    available: credited.saturating_sub(account.designated),
                })?;
            updates.push((address, account));
        }
        Ok((updates, until))
    }

    fn settle(&mut self, controller: &Address, context: &Context, now: Timestamp) -> Result<()> {
        let (updates, until) = self.settlement(controller, context, now)?;
        for (address, account) in updates {
            self.accounts.insert((*controller, *context, address), account);
        }
        if let Some(fund) = self.funds.get_mut(&(*controller, *context)) {
            let expiry = fund.lock.map_or(until, |lock| lock.expiry);
            for flow in &mut fund.flows {
                flow.settled_at = flow.settled_at.max(until);
            }
            fund.flows.retain(|flow| flow.settled_at < expiry);
        }
        Ok(())
    }
}
