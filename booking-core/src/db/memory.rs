//! A process-local repository backend.
//!
//! Holds everything in a mutex-guarded map. Registered as the `"memory"`
//! backend; useful for demos and for exercising settlement without SQLite.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::factory::{DbConfig, RepositoryFactory};
use super::repository::{BookingRepository, RepositoryError};
use crate::models::{
    Account, ItemKind, NewAccount, NewPurchase, PurchasableItem, Purchase,
};

#[derive(Default)]
struct State {
    items: BTreeMap<i64, PurchasableItem>,
    accounts: BTreeMap<i64, Account>,
    purchases: Vec<Purchase>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BookingRepository for InMemoryRepository {
    async fn list_items(
        &self,
        kind: Option<ItemKind>,
    ) -> Result<Vec<PurchasableItem>, RepositoryError> {
        Ok(self
            .lock()
            .items
            .values()
            .filter(|item| kind.is_none_or(|k| item.kind == k))
            .cloned()
            .collect())
    }

    async fn get_item(&self, id: i64) -> Result<PurchasableItem, RepositoryError> {
        self.lock().items.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn upsert_item(&self, item: &PurchasableItem) -> Result<(), RepositoryError> {
        self.lock().items.insert(item.id, item.clone());
        Ok(())
    }

    async fn delete_item(&self, id: i64) -> Result<(), RepositoryError> {
        self.lock()
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let mut state = self.lock();
        let id = state.accounts.keys().next_back().copied().unwrap_or(0) + 1;
        let now = Utc::now();
        let created = Account {
            id,
            display_name: account.display_name,
            balance: account.balance,
            created_at: now,
            updated_at: now,
        };
        state.accounts.insert(id, created.clone());
        Ok(created)
    }

    async fn get_account(&self, id: i64) -> Result<Account, RepositoryError> {
        self.lock().accounts.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, RepositoryError> {
        Ok(self.lock().accounts.values().cloned().collect())
    }

    async fn credit_account(
        &self,
        id: i64,
        amount: Decimal,
    ) -> Result<Account, RepositoryError> {
        let mut state = self.lock();
        let account = state.accounts.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        account.balance += amount;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn record_purchase(&self, purchase: NewPurchase) -> Result<Purchase, RepositoryError> {
        let mut state = self.lock();

        if state.purchases.iter().any(|p| p.intent_id == purchase.intent_id) {
            return Err(RepositoryError::DuplicateIntent(purchase.intent_id));
        }

        let account = state
            .accounts
            .get_mut(&purchase.account_id)
            .ok_or(RepositoryError::NotFound)?;
        if account.balance < purchase.total {
            return Err(RepositoryError::InsufficientFunds {
                balance: account.balance,
                required: purchase.total,
            });
        }
        account.balance -= purchase.total;
        account.updated_at = Utc::now();

        let recorded = Purchase {
            id: state.purchases.len() as i64 + 1,
            intent_id: purchase.intent_id,
            account_id: purchase.account_id,
            item_id: purchase.item_id,
            variant_id: purchase.variant_id,
            quantity: purchase.quantity,
            unit_price: purchase.unit_price,
            service_fee: purchase.service_fee,
            total: purchase.total,
            created_at: Utc::now(),
        };
        state.purchases.push(recorded.clone());
        Ok(recorded)
    }

    async fn list_purchases(
        &self,
        account_id: Option<i64>,
    ) -> Result<Vec<Purchase>, RepositoryError> {
        Ok(self
            .lock()
            .purchases
            .iter()
            .rev()
            .filter(|p| account_id.is_none_or(|id| p.account_id == id))
            .cloned()
            .collect())
    }
}

/// [`RepositoryFactory`] for the `"memory"` backend. The connection string
/// is ignored; every call returns a fresh, empty repository.
pub struct MemoryRepositoryFactory;

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(
        &self,
        _config: &DbConfig,
    ) -> Result<Box<dyn BookingRepository>, RepositoryError> {
        Ok(Box::new(InMemoryRepository::new()))
    }
}
