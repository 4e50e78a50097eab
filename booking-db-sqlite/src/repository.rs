use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use booking_core::{
    Account, BookingRepository, IntentId, ItemKind, NewAccount, NewPurchase, PurchasableItem,
    Purchase, RepositoryError, Variant,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info, warn};

use crate::decimal::{decimal_to_text, get_decimal};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connect to `database_url`, creating the database file if needed.
    ///
    /// Accepts sqlx URLs (`sqlite:bookings.db`, `sqlite::memory:`), a bare
    /// path, or `:memory:`.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database_url))?;
        Ok(Self { pool })
    }

    pub async fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Load and execute all SQL seed files from the specified directory.
    /// Files are executed in alphabetical order by filename.
    pub async fn run_seeds(
        &self,
        seeds_dir: &Path,
    ) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(seeds_dir)
            .with_context(|| format!("Failed to read seeds directory '{}'", seeds_dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
            .collect();

        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read seed file '{}'", path.display()))?;

            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to execute seed file '{}'", path.display()))?;
            debug!(file = %path.display(), "seed applied");
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_variants(
        &self,
        item_id: i64,
    ) -> Result<Vec<Variant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT variant_id, name, price_multiplier
             FROM item_variants WHERE item_id = ? ORDER BY position",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(Variant {
                    id: row.try_get("variant_id").map_err(db_err)?,
                    name: row.try_get("name").map_err(db_err)?,
                    price_multiplier: get_decimal(row, "price_multiplier")?,
                })
            })
            .collect()
    }

    async fn row_to_item(
        &self,
        row: &SqliteRow,
    ) -> Result<PurchasableItem, RepositoryError> {
        let id: i64 = row.try_get("id").map_err(db_err)?;
        let kind: String = row.try_get("kind").map_err(db_err)?;
        let available: Option<i64> = row.try_get("available_quantity").map_err(db_err)?;

        Ok(PurchasableItem {
            id,
            kind: ItemKind::parse(&kind)
                .ok_or_else(|| RepositoryError::Database(format!("Invalid item kind: {}", kind)))?,
            name: row.try_get("name").map_err(db_err)?,
            unit_price: get_decimal(row, "unit_price")?,
            available_quantity: available.map(|q| u32::try_from(q.max(0)).unwrap_or(u32::MAX)),
            variants: self.load_variants(id).await?,
        })
    }
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn row_to_account(row: &SqliteRow) -> Result<Account, RepositoryError> {
    Ok(Account {
        id: row.try_get("id").map_err(db_err)?,
        display_name: row.try_get("display_name").map_err(db_err)?,
        balance: get_decimal(row, "balance")?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| RepositoryError::Database(format!("Failed to get created_at: {}", e)))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| RepositoryError::Database(format!("Failed to get updated_at: {}", e)))?,
    })
}

fn row_to_purchase(row: &SqliteRow) -> Result<Purchase, RepositoryError> {
    let intent: String = row.try_get("intent_id").map_err(db_err)?;
    let quantity: i64 = row.try_get("quantity").map_err(db_err)?;

    Ok(Purchase {
        id: row.try_get("id").map_err(db_err)?,
        intent_id: IntentId::parse(&intent)
            .ok_or_else(|| RepositoryError::Database(format!("Invalid intent id: {}", intent)))?,
        account_id: row.try_get("account_id").map_err(db_err)?,
        item_id: row.try_get("item_id").map_err(db_err)?,
        variant_id: row.try_get("variant_id").map_err(db_err)?,
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Database(format!("Invalid quantity: {}", quantity)))?,
        unit_price: get_decimal(row, "unit_price")?,
        service_fee: get_decimal(row, "service_fee")?,
        total: get_decimal(row, "total")?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| RepositoryError::Database(format!("Failed to get created_at: {}", e)))?,
    })
}

async fn account_balance(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: i64,
) -> Result<Decimal, RepositoryError> {
    let row = sqlx::query("SELECT balance FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .ok_or(RepositoryError::NotFound)?;
    get_decimal(&row, "balance")
}

const SELECT_PURCHASE: &str = "SELECT id, intent_id, account_id, item_id, variant_id, quantity,
                                       unit_price, service_fee, total, created_at
                                FROM purchases";

#[async_trait]
impl BookingRepository for SqliteRepository {
    async fn list_items(
        &self,
        kind: Option<ItemKind>,
    ) -> Result<Vec<PurchasableItem>, RepositoryError> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT id, kind, name, unit_price, available_quantity
                     FROM items WHERE kind = ? ORDER BY id",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, kind, name, unit_price, available_quantity
                     FROM items ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.row_to_item(row).await?);
        }
        Ok(items)
    }

    async fn get_item(&self, id: i64) -> Result<PurchasableItem, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, kind, name, unit_price, available_quantity FROM items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(RepositoryError::NotFound)?;

        self.row_to_item(&row).await
    }

    async fn upsert_item(&self, item: &PurchasableItem) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO items (id, kind, name, unit_price, available_quantity)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                unit_price = excluded.unit_price,
                available_quantity = excluded.available_quantity",
        )
        .bind(item.id)
        .bind(item.kind.as_str())
        .bind(&item.name)
        .bind(decimal_to_text(item.unit_price))
        .bind(item.available_quantity.map(i64::from))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM item_variants WHERE item_id = ?")
            .bind(item.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for (position, variant) in item.variants.iter().enumerate() {
            sqlx::query(
                "INSERT INTO item_variants (item_id, variant_id, name, price_multiplier, position)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(item.id)
            .bind(&variant.id)
            .bind(&variant.name)
            .bind(decimal_to_text(variant.price_multiplier))
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(item_id = item.id, variants = item.variants.len(), "item upserted");
        Ok(())
    }

    async fn delete_item(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO accounts (display_name, balance, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&account.display_name)
        .bind(decimal_to_text(account.balance))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_account(result.last_insert_rowid()).await
    }

    async fn get_account(&self, id: i64) -> Result<Account, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, display_name, balance, created_at, updated_at FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(RepositoryError::NotFound)?;

        row_to_account(&row)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, display_name, balance, created_at, updated_at FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_account).collect()
    }

    async fn credit_account(
        &self,
        id: i64,
        amount: Decimal,
    ) -> Result<Account, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let balance = account_balance(&mut tx, id).await?;
        let new_balance = balance + amount;

        sqlx::query("UPDATE accounts SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(decimal_to_text(new_balance))
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        info!(account_id = id, amount = %amount, balance = %new_balance, "account credited");
        self.get_account(id).await
    }

    async fn record_purchase(&self, purchase: NewPurchase) -> Result<Purchase, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Insert first so the write lock is held before the balance is read.
        let inserted = sqlx::query(
            "INSERT INTO purchases (
                intent_id, account_id, item_id, variant_id, quantity,
                unit_price, service_fee, total, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(purchase.intent_id.to_string())
        .bind(purchase.account_id)
        .bind(purchase.item_id)
        .bind(&purchase.variant_id)
        .bind(i64::from(purchase.quantity))
        .bind(decimal_to_text(purchase.unit_price))
        .bind(decimal_to_text(purchase.service_fee))
        .bind(decimal_to_text(purchase.total))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!(intent_id = %purchase.intent_id, "purchase already recorded");
                return Err(RepositoryError::DuplicateIntent(purchase.intent_id));
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(RepositoryError::NotFound);
            }
            Err(e) => return Err(db_err(e)),
        };

        let balance = account_balance(&mut tx, purchase.account_id).await?;
        if balance < purchase.total {
            // Dropping the transaction rolls the insert back.
            return Err(RepositoryError::InsufficientFunds {
                balance,
                required: purchase.total,
            });
        }

        sqlx::query("UPDATE accounts SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(decimal_to_text(balance - purchase.total))
            .bind(Utc::now())
            .bind(purchase.account_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let sql = format!("{} WHERE id = ?", SELECT_PURCHASE);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let recorded = row_to_purchase(&row)?;

        tx.commit().await.map_err(db_err)?;
        info!(
            purchase_id = recorded.id,
            intent_id = %recorded.intent_id,
            account_id = recorded.account_id,
            total = %recorded.total,
            "purchase recorded"
        );
        Ok(recorded)
    }

    async fn list_purchases(
        &self,
        account_id: Option<i64>,
    ) -> Result<Vec<Purchase>, RepositoryError> {
        let filtered = format!("{} WHERE account_id = ? ORDER BY id DESC", SELECT_PURCHASE);
        let unfiltered = format!("{} ORDER BY id DESC", SELECT_PURCHASE);

        let rows = match account_id {
            Some(account_id) => {
                sqlx::query(&filtered)
                    .bind(account_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => sqlx::query(&unfiltered).fetch_all(&self.pool).await,
        }
        .map_err(db_err)?;

        rows.iter().map(row_to_purchase).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn setup_test_db() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        let repo = SqliteRepository::new_with_pool(pool).await;
        repo.run_migrations()
            .await
            .expect("Failed to run migrations");
        repo
    }

    fn gala() -> PurchasableItem {
        PurchasableItem {
            id: 3,
            kind: ItemKind::Event,
            name: "Summer Gala".to_string(),
            unit_price: dec!(150.00),
            available_quantity: Some(250),
            variants: vec![
                Variant::standard(),
                Variant {
                    id: "vip".to_string(),
                    name: "VIP".to_string(),
                    price_multiplier: dec!(1.5),
                },
            ],
        }
    }

    async fn account_with(
        repo: &SqliteRepository,
        balance: Decimal,
    ) -> Account {
        repo.create_account(NewAccount {
            display_name: "Dana".to_string(),
            balance,
        })
        .await
        .expect("Failed to create account")
    }

    fn purchase_for(
        account_id: i64,
        total: Decimal,
    ) -> NewPurchase {
        NewPurchase {
            intent_id: IntentId::new(),
            account_id,
            item_id: 3,
            variant_id: "standard".to_string(),
            quantity: 2,
            unit_price: dec!(150),
            service_fee: dec!(15),
            total,
        }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    #[tokio::test]
    async fn test_upsert_and_get_item() {
        let repo = setup_test_db().await;

        repo.upsert_item(&gala()).await.expect("Should upsert item");
        let item = repo.get_item(3).await.expect("Should find item");

        assert_eq!(item, gala());
    }

    #[tokio::test]
    async fn test_upsert_replaces_variants() {
        let repo = setup_test_db().await;
        repo.upsert_item(&gala()).await.expect("Should upsert item");

        let mut changed = gala();
        changed.unit_price = dec!(175);
        changed.variants.truncate(1);
        repo.upsert_item(&changed).await.expect("Should upsert item");

        let item = repo.get_item(3).await.expect("Should find item");
        assert_eq!(item.unit_price, dec!(175));
        assert_eq!(item.variants, vec![Variant::standard()]);
    }

    #[tokio::test]
    async fn test_list_items_by_kind() {
        let repo = setup_test_db().await;
        repo.upsert_item(&gala()).await.expect("Should upsert item");
        repo.upsert_item(&PurchasableItem {
            id: 1,
            kind: ItemKind::CelebrityBooking,
            name: "Ava Stone".to_string(),
            unit_price: dec!(50000),
            available_quantity: None,
            variants: vec![Variant::standard()],
        })
        .await
        .expect("Should upsert item");

        let events = repo.list_items(Some(ItemKind::Event)).await.expect("Should list");
        let all = repo.list_items(None).await.expect("Should list");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Summer Gala");
        assert_eq!(all.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_delete_item() {
        let repo = setup_test_db().await;
        repo.upsert_item(&gala()).await.expect("Should upsert item");

        repo.delete_item(3).await.expect("Should delete item");

        assert!(matches!(repo.get_item(3).await, Err(RepositoryError::NotFound)));
        assert!(matches!(repo.delete_item(3).await, Err(RepositoryError::NotFound)));
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    #[tokio::test]
    async fn test_create_and_credit_account() {
        let repo = setup_test_db().await;
        let account = account_with(&repo, dec!(500)).await;

        let credited = repo
            .credit_account(account.id, dec!(52000))
            .await
            .expect("Should credit");

        assert_eq!(credited.balance, dec!(52500));
        assert_eq!(repo.list_accounts().await.expect("Should list").len(), 1);
    }

    #[tokio::test]
    async fn test_credit_missing_account() {
        let repo = setup_test_db().await;

        let result = repo.credit_account(42, dec!(10)).await;

        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    #[tokio::test]
    async fn test_record_purchase_debits_balance() {
        let repo = setup_test_db().await;
        let account = account_with(&repo, dec!(1000)).await;

        let recorded = repo
            .record_purchase(purchase_for(account.id, dec!(315)))
            .await
            .expect("Should record purchase");

        assert_eq!(recorded.total, dec!(315));
        let account = repo.get_account(account.id).await.expect("Should find account");
        assert_eq!(account.balance, dec!(685));
    }

    #[tokio::test]
    async fn test_record_purchase_insufficient_funds_rolls_back() {
        let repo = setup_test_db().await;
        let account = account_with(&repo, dec!(500)).await;

        let result = repo.record_purchase(purchase_for(account.id, dec!(52500))).await;

        assert_eq!(
            result,
            Err(RepositoryError::InsufficientFunds {
                balance: dec!(500),
                required: dec!(52500),
            })
        );
        assert!(repo.list_purchases(None).await.expect("Should list").is_empty());
        let account = repo.get_account(account.id).await.expect("Should find account");
        assert_eq!(account.balance, dec!(500));
    }

    #[tokio::test]
    async fn test_record_purchase_rejects_duplicate_intent() {
        let repo = setup_test_db().await;
        let account = account_with(&repo, dec!(1000)).await;
        let purchase = purchase_for(account.id, dec!(315));

        repo.record_purchase(purchase.clone()).await.expect("Should record");
        let again = repo.record_purchase(purchase.clone()).await;

        assert_eq!(again, Err(RepositoryError::DuplicateIntent(purchase.intent_id)));
        let account = repo.get_account(account.id).await.expect("Should find account");
        assert_eq!(account.balance, dec!(685));
    }

    #[tokio::test]
    async fn test_list_purchases_newest_first() {
        let repo = setup_test_db().await;
        let first = account_with(&repo, dec!(1000)).await;
        let second = account_with(&repo, dec!(1000)).await;

        let a = repo.record_purchase(purchase_for(first.id, dec!(100))).await.expect("Should record");
        let b = repo.record_purchase(purchase_for(first.id, dec!(200))).await.expect("Should record");
        repo.record_purchase(purchase_for(second.id, dec!(300))).await.expect("Should record");

        let mine = repo.list_purchases(Some(first.id)).await.expect("Should list");
        let all = repo.list_purchases(None).await.expect("Should list");

        assert_eq!(mine.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_seeds_load_sample_catalog() {
        let repo = setup_test_db().await;
        let seeds = Path::new(env!("CARGO_MANIFEST_DIR")).join("seeds");

        repo.run_seeds(&seeds).await.expect("Should run seeds");
        repo.run_seeds(&seeds).await.expect("Seeds should be repeatable");

        let gala = repo.get_item(3).await.expect("Should find seeded gala");
        assert_eq!(gala.unit_price, dec!(150));
        assert_eq!(gala.variants.len(), 2);
        let guest = repo.get_account(1).await.expect("Should find guest account");
        assert_eq!(guest.balance, dec!(75000));
    }
}
