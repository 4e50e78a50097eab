use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    Account, IntentId, ItemKind, NewAccount, NewPurchase, PurchasableItem, Purchase,
};

#[derive(Debug, Error, PartialEq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unknown backend '{requested}'; available: {}", .available.join(", "))]
    UnknownBackend {
        requested: String,
        available: Vec<&'static str>,
    },

    #[error("Insufficient balance: {balance} available, {required} required")]
    InsufficientFunds { balance: Decimal, required: Decimal },

    #[error("Purchase for intent {0} already recorded")]
    DuplicateIntent(IntentId),
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    // Catalog
    async fn list_items(
        &self,
        kind: Option<ItemKind>,
    ) -> Result<Vec<PurchasableItem>, RepositoryError>;
    async fn get_item(&self, id: i64) -> Result<PurchasableItem, RepositoryError>;

    /// Inserts the item or replaces it (variants included) if the id exists.
    async fn upsert_item(&self, item: &PurchasableItem) -> Result<(), RepositoryError>;
    async fn delete_item(&self, id: i64) -> Result<(), RepositoryError>;

    // Accounts
    async fn create_account(&self, account: NewAccount) -> Result<Account, RepositoryError>;
    async fn get_account(&self, id: i64) -> Result<Account, RepositoryError>;
    async fn list_accounts(&self) -> Result<Vec<Account>, RepositoryError>;
    async fn credit_account(
        &self,
        id: i64,
        amount: Decimal,
    ) -> Result<Account, RepositoryError>;

    // Purchases

    /// Debits the account and records the purchase in one step.
    ///
    /// Fails with [`RepositoryError::InsufficientFunds`] when the stored
    /// balance no longer covers `purchase.total`, and with
    /// [`RepositoryError::DuplicateIntent`] when the intent was already
    /// recorded. Neither failure changes the balance.
    async fn record_purchase(&self, purchase: NewPurchase) -> Result<Purchase, RepositoryError>;
    async fn list_purchases(
        &self,
        account_id: Option<i64>,
    ) -> Result<Vec<Purchase>, RepositoryError>;
}
