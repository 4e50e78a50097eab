//! Session-scoped user balance.
//!
//! One [`BalanceStore`] is created per session and cloned into every purchase
//! flow, so all flows see and mutate the same balance. Settlement never
//! debits directly: the flow first takes a [`Reservation`] (which re-runs
//! the balance gate against what is still available), then commits it once
//! the settlement backend confirms, or releases it if settlement fails.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::calculations::{BalanceGate, GateDecision};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
        shortfall: Decimal,
    },

    #[error("amount must not be negative, got {0}")]
    NegativeAmount(Decimal),
}

#[derive(Debug)]
struct Ledger {
    balance: Decimal,
    held: Decimal,
}

#[derive(Debug, Clone)]
pub struct BalanceStore {
    inner: Arc<Mutex<Ledger>>,
}

impl BalanceStore {
    pub fn new(balance: Decimal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ledger {
                balance,
                held: Decimal::ZERO,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed balance, including amounts currently held.
    pub fn balance(&self) -> Decimal {
        self.lock().balance
    }

    /// Sum of outstanding reservations.
    pub fn held(&self) -> Decimal {
        self.lock().held
    }

    /// Balance that a new purchase may draw on.
    pub fn available(&self) -> Decimal {
        let ledger = self.lock();
        ledger.balance - ledger.held
    }

    /// Replaces the committed balance, e.g. after reloading the account.
    /// Outstanding reservations are kept.
    pub fn sync(
        &self,
        balance: Decimal,
    ) {
        let mut ledger = self.lock();
        debug!(old = %ledger.balance, new = %balance, "balance synced");
        ledger.balance = balance;
    }

    /// Deducts `amount` immediately, returning the new balance.
    ///
    /// # Errors
    ///
    /// [`BalanceError::InsufficientFunds`] when `amount` exceeds what is
    /// available; the balance is left untouched.
    pub fn debit(
        &self,
        amount: Decimal,
    ) -> Result<Decimal, BalanceError> {
        self.reserve(amount).map(Reservation::commit)
    }

    /// Adds `amount` (a top-up), returning the new balance.
    pub fn credit(
        &self,
        amount: Decimal,
    ) -> Result<Decimal, BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount(amount));
        }
        let mut ledger = self.lock();
        ledger.balance += amount;
        info!(amount = %amount, balance = %ledger.balance, "balance credited");
        Ok(ledger.balance)
    }

    /// Holds `amount` so no other flow can spend it. The check and the hold
    /// happen under one lock.
    pub fn reserve(
        &self,
        amount: Decimal,
    ) -> Result<Reservation, BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount(amount));
        }

        let mut ledger = self.lock();
        let available = ledger.balance - ledger.held;
        if let GateDecision::InsufficientFunds { shortfall } = BalanceGate::evaluate(available, amount)
        {
            return Err(BalanceError::InsufficientFunds {
                available,
                required: amount,
                shortfall,
            });
        }
        ledger.held += amount;
        debug!(amount = %amount, held = %ledger.held, "balance reserved");

        Ok(Reservation {
            store: self.clone(),
            amount,
            open: true,
        })
    }
}

/// A hold on part of the balance. Dropping it without calling
/// [`Reservation::commit`] releases the hold.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it"]
pub struct Reservation {
    store: BalanceStore,
    amount: Decimal,
    open: bool,
}

impl Reservation {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Turns the hold into a debit and returns the new balance.
    pub fn commit(mut self) -> Decimal {
        self.open = false;
        let mut ledger = self.store.lock();
        ledger.held -= self.amount;
        ledger.balance -= self.amount;
        info!(amount = %self.amount, balance = %ledger.balance, "balance debited");
        ledger.balance
    }

    /// Gives the held amount back without debiting.
    pub fn release(self) {}
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.open {
            let mut ledger = self.store.lock();
            ledger.held -= self.amount;
            debug!(amount = %self.amount, held = %ledger.held, "reservation released");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn debit_reduces_balance() {
        let store = BalanceStore::new(dec!(75000));

        assert_eq!(store.debit(dec!(52500)), Ok(dec!(22500)));
        assert_eq!(store.balance(), dec!(22500));
    }

    #[test]
    fn debit_beyond_balance_is_rejected_untouched() {
        let store = BalanceStore::new(dec!(500));

        assert_eq!(
            store.debit(dec!(52500)),
            Err(BalanceError::InsufficientFunds {
                available: dec!(500),
                required: dec!(52500),
                shortfall: dec!(52000),
            })
        );
        assert_eq!(store.balance(), dec!(500));
    }

    #[test]
    fn credit_rejects_negative_amounts() {
        let store = BalanceStore::new(dec!(10));

        assert_eq!(store.credit(dec!(-1)), Err(BalanceError::NegativeAmount(dec!(-1))));
        assert_eq!(store.credit(dec!(52000)), Ok(dec!(52010)));
    }

    #[test]
    fn reservation_hides_amount_from_available() {
        let store = BalanceStore::new(dec!(1000));

        let hold = store.reserve(dec!(315)).unwrap();

        assert_eq!(store.available(), dec!(685));
        assert_eq!(store.balance(), dec!(1000));
        assert_eq!(store.held(), hold.amount());
    }

    #[test]
    fn two_holds_cannot_overspend() {
        let store = BalanceStore::new(dec!(500));

        let first = store.reserve(dec!(315)).unwrap();
        let second = store.reserve(dec!(315));

        assert!(matches!(second, Err(BalanceError::InsufficientFunds { .. })));
        drop(first);
        assert!(store.reserve(dec!(315)).is_ok());
    }

    #[test]
    fn commit_debits_once() {
        let store = BalanceStore::new(dec!(1000));

        let new_balance = store.reserve(dec!(472.50)).unwrap().commit();

        assert_eq!(new_balance, dec!(527.50));
        assert_eq!(store.held(), Decimal::ZERO);
        assert_eq!(store.available(), dec!(527.50));
    }

    #[test]
    fn release_and_drop_restore_available() {
        let store = BalanceStore::new(dec!(1000));

        store.reserve(dec!(400)).unwrap().release();
        assert_eq!(store.available(), dec!(1000));

        {
            let _hold = store.reserve(dec!(400)).unwrap();
            assert_eq!(store.available(), dec!(600));
        }
        assert_eq!(store.available(), dec!(1000));
        assert_eq!(store.balance(), dec!(1000));
    }

    #[test]
    fn clones_share_one_balance() {
        let store = BalanceStore::new(dec!(100));
        let other_page = store.clone();

        other_page.debit(dec!(40)).unwrap();

        assert_eq!(store.balance(), dec!(60));
    }

    #[test]
    fn sync_keeps_outstanding_holds() {
        let store = BalanceStore::new(dec!(100));
        let _hold = store.reserve(dec!(30)).unwrap();

        store.sync(dec!(50));

        assert_eq!(store.balance(), dec!(50));
        assert_eq!(store.available(), dec!(20));
    }
}
