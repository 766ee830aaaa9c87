//! Sequential transaction execution.
//!
//! Every operation runs as one transaction: the ledger samples the clock once,
//! runs the operation against the marketplace and either commits every effect
//! or none. Transactions are serialized, and observed time never moves
//! backwards between them.

use std::sync::Arc;

use stow_core::{Address, Call, Clock, Timestamp};
use stow_token::Token;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::marketplace::Marketplace;
use crate::verifier::{NonEmptyProof, ProofVerifier};

struct Sequenced<T, V> {
    marketplace: Marketplace<T, V>,
    last: Timestamp,
    height: u64,
}

/// Runs marketplace operations one at a time, atomically.
pub struct Ledger<T, V = NonEmptyProof> {
    state: Mutex<Sequenced<T, V>>,
    clock: Arc<dyn Clock>,
}

impl<T, V> std::fmt::Debug for Ledger<T, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl<T, V> Ledger<T, V>
where
    T: Token + Clone,
    V: ProofVerifier + Clone,
{
    /// Wraps `marketplace`, reading time from `clock`.
    pub fn new(marketplace: Marketplace<T, V>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(Sequenced {
                marketplace,
                last: 0,
                height: 0,
            }),
            clock,
        }
    }

    /// Runs `op` on behalf of `caller`.
    ///
    /// If `op` fails, the marketplace (token balances, vault, proofs and
    /// events included) is restored to what it was before.
    ///
    /// # Errors
    ///
    /// Returns the error of `op`.
    pub async fn transact<R>(
        &self,
        caller: Address,
        op: impl FnOnce(&mut Marketplace<T, V>, &Call) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock().await;
        let now = self.clock.now().max(state.last);
        let call = Call::new(caller, now);
        let snapshot = state.marketplace.clone();

        match op(&mut state.marketplace, &call) {
            Ok(value) => {
                state.last = now;
                state.height += 1;
                debug!(caller = %caller, now, height = state.height, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                state.marketplace = snapshot;
                warn!(caller = %caller, now, error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Reads from the marketplace at the current time.
    pub async fn view<R>(&self, op: impl FnOnce(&Marketplace<T, V>, Timestamp) -> R) -> R {
        let state = self.state.lock().await;
        let now = self.clock.now().max(state.last);
        op(&state.marketplace, now)
    }

    /// Time the next transaction would observe.
    pub async fn now(&self) -> Timestamp {
        let state = self.state.lock().await;
        self.clock.now().max(state.last)
    }

    /// Number of committed transactions.
    pub async fn height(&self) -> u64 {
        self.state.lock().await.height
    }
}
