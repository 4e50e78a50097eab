use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use booking_core::calculations::common::format_currency;
use booking_core::calculations::{BalanceGate, GateDecision, PriceQuote, TopUpRequest};
use booking_core::db::{MemoryRepositoryFactory, RepositoryRegistry};
use booking_core::flow::{
    BalanceStore, ConfirmationSummary, FlowError, FlowStep, LedgerSettlement, Notice,
    PurchaseFlow, SettlementGateway, SettlementReceipt, SimulatedSettlement, StepPlan,
};
use booking_core::{
    Account, BookingDetails, BookingRepository, NewAccount, PurchasableItem, Purchase,
    RepositoryError,
};
use booking_data::CatalogLoader;
use booking_db_sqlite::SqliteRepositoryFactory;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, SettlementConfig, SettlementMode};

/// Every backend the binary can open.
pub fn build_registry() -> RepositoryRegistry {
    RepositoryRegistry::new()
        .with(SqliteRepositoryFactory)
        .with(MemoryRepositoryFactory)
}

/// Imports a catalog CSV through any backend.
pub async fn import_catalog(
    repo: &dyn BookingRepository,
    path: &Path,
) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    let records = CatalogLoader::parse(file)
        .with_context(|| format!("Failed to parse CSV: {}", path.display()))?;
    let loaded = CatalogLoader::load(repo, &records)
        .await
        .context("Failed to load catalog into database")?;
    info!(file = %path.display(), items = loaded, "catalog imported");
    Ok(loaded)
}

// ─── session ─────────────────────────────────────────────────────────────────

/// One user's session: the backing account, the shared balance every
/// purchase flow draws on, and the settlement gateway.
pub struct Session {
    repo: Arc<dyn BookingRepository>,
    account: Account,
    balance: BalanceStore,
    gateway: Arc<dyn SettlementGateway>,
}

impl Session {
    /// Loads the configured account, creating it with the starting balance
    /// when it does not exist yet.
    pub async fn open(
        repo: Arc<dyn BookingRepository>,
        session: &SessionConfig,
        settlement: &SettlementConfig,
    ) -> Result<Self> {
        let account = match repo.get_account(session.account_id).await {
            Ok(account) => account,
            Err(RepositoryError::NotFound) => {
                let created = repo
                    .create_account(NewAccount {
                        display_name: "Guest".to_string(),
                        balance: session.starting_balance,
                    })
                    .await
                    .context("Failed to create session account")?;
                warn!(
                    requested = session.account_id,
                    created = created.id,
                    "account not found; created a new one"
                );
                created
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to load account {}", session.account_id));
            }
        };

        let gateway: Arc<dyn SettlementGateway> = match settlement.mode {
            SettlementMode::Simulated => Arc::new(SimulatedSettlement::new(settlement.delay())),
            SettlementMode::Ledger => Arc::new(LedgerSettlement::new(repo.clone(), account.id)),
        };

        info!(
            account_id = account.id,
            balance = %account.balance,
            mode = ?settlement.mode,
            "session opened"
        );

        Ok(Self {
            balance: BalanceStore::new(account.balance),
            repo,
            account,
            gateway,
        })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn balance(&self) -> &BalanceStore {
        &self.balance
    }

    pub fn repo(&self) -> &dyn BookingRepository {
        self.repo.as_ref()
    }

    /// Credits the stored account and the session balance. The amount must
    /// be positive; nothing is written otherwise.
    pub async fn top_up(
        &mut self,
        amount: Decimal,
    ) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            bail!("top-up amount must be positive, got {amount}");
        }
        self.account = self
            .repo
            .credit_account(self.account.id, amount)
            .await
            .context("Failed to credit account")?;
        let balance = self.balance.credit(amount)?;
        Ok(balance)
    }

    pub async fn open_flow(
        &self,
        item_id: i64,
        plan: StepPlan,
    ) -> Result<PurchaseFlow> {
        let item = self
            .repo
            .get_item(item_id)
            .await
            .with_context(|| format!("Item {} not found", item_id))?;
        Ok(PurchaseFlow::new(item, plan, self.balance.clone(), self.gateway.clone()))
    }

    pub async fn history(&self) -> Result<Vec<Purchase>> {
        self.repo
            .list_purchases(Some(self.account.id))
            .await
            .context("Failed to load purchase history")
    }
}

// ─── quote ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteView {
    pub item_name: String,
    pub variant_name: String,
    pub quote: PriceQuote,
    pub balance: Decimal,
    pub decision: GateDecision,
}

/// Prices a selection against the session balance without starting a
/// purchase.
pub async fn quote(
    session: &Session,
    item_id: i64,
    variant: Option<&str>,
    quantity: Option<&str>,
) -> Result<QuoteView> {
    let mut flow = session.open_flow(item_id, StepPlan::single_dialog()).await?;
    if let Some(variant) = variant {
        flow.select_variant(variant)?;
    }
    if let Some(quantity) = quantity {
        flow.set_quantity_input(quantity)?;
    }

    let quote = flow.quote()?;
    let balance = session.balance().available();
    Ok(QuoteView {
        item_name: flow.item().name.clone(),
        variant_name: flow.selected_variant()?.name.clone(),
        decision: BalanceGate::evaluate(balance, quote.total),
        quote,
        balance,
    })
}

// ─── purchase ────────────────────────────────────────────────────────────────

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct PurchaseRequest {
    pub item_id: i64,
    pub wizard: bool,
    pub variant: Option<String>,
    /// Raw text; anything but a whole number becomes one, and a whole number
    /// too large to count is rejected.
    pub quantity: Option<String>,
    pub details: BookingDetails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Settled {
        receipt: SettlementReceipt,
        remaining: Decimal,
    },
    /// The balance gate blocked the purchase before confirmation.
    Blocked(TopUpRequest),
    /// The user looked at the summary and said no.
    NotConfirmed(ConfirmationSummary),
    /// Confirmation was attempted but did not settle. Nothing was charged.
    Failed(FlowError),
}

#[derive(Debug, Clone)]
pub struct PurchaseReport {
    pub outcome: PurchaseOutcome,
    pub notices: Vec<Notice>,
}

/// Drives one purchase flow from selection to settlement.
///
/// `confirm` is shown the summary and decides whether to commit.
pub async fn run_purchase<F>(
    session: &Session,
    request: &PurchaseRequest,
    confirm: F,
) -> Result<PurchaseReport>
where
    F: FnOnce(&ConfirmationSummary) -> bool,
{
    let plan = if request.wizard {
        StepPlan::wizard()
    } else {
        StepPlan::single_dialog()
    };
    let mut flow = session.open_flow(request.item_id, plan).await?;

    if let Some(variant) = &request.variant {
        flow.select_variant(variant)?;
    }
    if let Some(quantity) = &request.quantity {
        flow.set_quantity_input(quantity)?;
    }
    flow.set_details(request.details.clone())?;

    while let Some(step) = flow.current_step() {
        if step == FlowStep::Payment {
            break;
        }
        let next = flow.advance()?;
        debug!(step = %next, "advanced");
    }

    if let GateDecision::InsufficientFunds { shortfall } = flow.proceed()? {
        return Ok(PurchaseReport {
            outcome: PurchaseOutcome::Blocked(TopUpRequest { shortfall }),
            notices: flow.take_notices(),
        });
    }

    let summary = flow
        .summary()
        .ok_or_else(|| anyhow!("no purchase awaiting confirmation"))?;
    if !confirm(&summary) {
        flow.cancel()?;
        return Ok(PurchaseReport {
            outcome: PurchaseOutcome::NotConfirmed(summary),
            notices: flow.take_notices(),
        });
    }

    let outcome = match flow.confirm().await {
        Ok(receipt) => PurchaseOutcome::Settled {
            receipt,
            remaining: session.balance().balance(),
        },
        Err(e @ (FlowError::Settlement(_) | FlowError::InsufficientFunds { .. })) => {
            PurchaseOutcome::Failed(e)
        }
        Err(e) => return Err(e.into()),
    };

    Ok(PurchaseReport {
        outcome,
        notices: flow.take_notices(),
    })
}

// ─── rendering ───────────────────────────────────────────────────────────────

pub fn render_catalog(items: &[PurchasableItem]) -> String {
    if items.is_empty() {
        return "No items in the catalog.\n".to_string();
    }

    let mut out = String::new();
    for item in items {
        let _ = write!(
            out,
            "#{:<4} {} ({}) {}",
            item.id,
            item.name,
            item.kind.as_str(),
            format_currency(item.unit_price)
        );
        if let Some(available) = item.available_quantity {
            let _ = write!(out, "  [{} available]", available);
        }
        out.push('\n');
        for variant in &item.variants {
            let price = match item.unit_price_for(variant) {
                Ok(price) => format_currency(price),
                Err(e) => e.to_string(),
            };
            let _ = writeln!(out, "       {:<20} {:<22} {}", variant.id, variant.name, price);
        }
    }
    out
}

pub fn render_quote(view: &QuoteView) -> String {
    let mut out = String::new();
    let q = &view.quote;
    let _ = writeln!(out, "{} ({})", view.item_name, view.variant_name);
    let _ = writeln!(out, "  Unit price:   {} x {}", format_currency(q.unit_price), q.quantity);
    let _ = writeln!(out, "  Subtotal:     {}", format_currency(q.subtotal));
    let _ = writeln!(out, "  Service fee:  {}", format_currency(q.service_fee));
    let _ = writeln!(out, "  Total:        {}", format_currency(q.total));
    let _ = writeln!(out, "  Balance:      {}", format_currency(view.balance));
    match view.decision {
        GateDecision::Proceed => {
            let _ = writeln!(out, "  You can afford this purchase.");
        }
        GateDecision::InsufficientFunds { shortfall } => {
            let _ = writeln!(out, "  Top up {} to afford this purchase.", format_currency(shortfall));
        }
    }
    out
}

pub fn render_summary(summary: &ConfirmationSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Confirm purchase");
    let _ = writeln!(out, "  Item:         {} ({})", summary.item_name, summary.variant_name);
    let _ = writeln!(out, "  Quantity:     {}", summary.quantity);
    if let Some(date) = &summary.details.date {
        let time = summary.details.time.as_deref().unwrap_or("");
        let _ = writeln!(out, "  When:         {} {}", date, time);
    }
    if let Some(requests) = &summary.details.special_requests {
        let _ = writeln!(out, "  Requests:     {}", requests);
    }
    let _ = writeln!(out, "  Unit price:   {}", format_currency(summary.unit_price));
    let _ = writeln!(out, "  Subtotal:     {}", format_currency(summary.subtotal));
    let _ = writeln!(out, "  Service fee:  {}", format_currency(summary.service_fee));
    let _ = writeln!(out, "  Total:        {}", format_currency(summary.total));
    let _ = writeln!(out, "  Balance:      {}", format_currency(summary.current_balance));
    let _ = writeln!(out, "  After:        {}", format_currency(summary.projected_balance));
    out
}

pub fn render_history(
    account: &Account,
    balance: Decimal,
    purchases: &[Purchase],
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} (account #{}), balance {}",
        account.display_name,
        account.id,
        format_currency(balance)
    );
    if purchases.is_empty() {
        let _ = writeln!(out, "No purchases yet.");
        return out;
    }
    for p in purchases {
        let _ = writeln!(
            out,
            "  {}  item #{} {} x{}  {}",
            p.created_at.format("%Y-%m-%d %H:%M"),
            p.item_id,
            p.variant_id,
            p.quantity,
            format_currency(p.total)
        );
    }
    out
}
