//! The request/response boundary between a confirmed intent and whatever
//! actually takes the money.
//!
//! Two gateways ship with the crate:
//!
//! * [`SimulatedSettlement`]: waits a fixed delay, then succeeds (or fails
//!   with a configured reason). Stands in for a payment backend.
//! * [`LedgerSettlement`]: records the purchase through a
//!   [`BookingRepository`], which debits the stored account balance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{BookingRepository, RepositoryError};
use crate::models::{BookingIntent, IntentId, NewPurchase};

/// How long [`SimulatedSettlement`] pauses when no delay is configured.
pub const DEFAULT_SIMULATED_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("insufficient funds: short by {shortfall}")]
    InsufficientFunds { shortfall: Decimal },

    #[error("intent {0} has already been settled")]
    AlreadySettled(IntentId),

    #[error("settlement backend error: {0}")]
    Backend(String),
}

/// Everything a backend needs to charge for one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub intent_id: IntentId,
    pub item_id: i64,
    pub item_name: String,
    pub variant_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
}

impl From<&BookingIntent> for SettlementRequest {
    fn from(intent: &BookingIntent) -> Self {
        Self {
            intent_id: intent.id,
            item_id: intent.item.id,
            item_name: intent.item.name.clone(),
            variant_id: intent.variant.id.clone(),
            quantity: intent.quantity.get(),
            unit_price: intent.quote.unit_price,
            service_fee: intent.quote.service_fee,
            total: intent.quote.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub intent_id: IntentId,
    /// Backend reference for the charge.
    pub reference: String,
    pub amount_paid: Decimal,
    pub settled_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError>;
}

/// Pretends to talk to a payment backend.
#[derive(Debug, Clone)]
pub struct SimulatedSettlement {
    delay: Duration,
    decline_reason: Option<String>,
}

impl SimulatedSettlement {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            decline_reason: None,
        }
    }

    /// No delay; for tests and scripted runs.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Every settlement fails with [`SettlementError::Declined`].
    pub fn declining(
        mut self,
        reason: impl Into<String>,
    ) -> Self {
        self.decline_reason = Some(reason.into());
        self
    }
}

impl Default for SimulatedSettlement {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_DELAY)
    }
}

#[async_trait]
impl SettlementGateway for SimulatedSettlement {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(reason) = &self.decline_reason {
            warn!(intent_id = %request.intent_id, reason = %reason, "simulated settlement declined");
            return Err(SettlementError::Declined(reason.clone()));
        }

        let reference = format!("sim-{}", request.intent_id);
        info!(
            intent_id = %request.intent_id,
            total = %request.total,
            reference = %reference,
            "simulated settlement succeeded"
        );

        Ok(SettlementReceipt {
            intent_id: request.intent_id,
            reference,
            amount_paid: request.total,
            settled_at: Utc::now(),
        })
    }
}

/// Settles by writing the purchase to the ledger for one account.
pub struct LedgerSettlement {
    repo: Arc<dyn BookingRepository>,
    account_id: i64,
}

impl LedgerSettlement {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        account_id: i64,
    ) -> Self {
        Self { repo, account_id }
    }
}

#[async_trait]
impl SettlementGateway for LedgerSettlement {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let purchase = NewPurchase {
            intent_id: request.intent_id,
            account_id: self.account_id,
            item_id: request.item_id,
            variant_id: request.variant_id.clone(),
            quantity: request.quantity,
            unit_price: request.unit_price,
            service_fee: request.service_fee,
            total: request.total,
        };

        let recorded = self.repo.record_purchase(purchase).await.map_err(|e| {
            warn!(intent_id = %request.intent_id, error = %e, "ledger settlement failed");
            match e {
                RepositoryError::InsufficientFunds { balance, required } => {
                    SettlementError::InsufficientFunds {
                        shortfall: required - balance,
                    }
                }
                RepositoryError::DuplicateIntent(id) => SettlementError::AlreadySettled(id),
                other => SettlementError::Backend(other.to_string()),
            }
        })?;

        info!(
            intent_id = %request.intent_id,
            purchase_id = recorded.id,
            account_id = self.account_id,
            total = %recorded.total,
            "purchase recorded"
        );

        Ok(SettlementReceipt {
            intent_id: recorded.intent_id,
            reference: format!("purchase-{}", recorded.id),
            amount_paid: recorded.total,
            settled_at: recorded.created_at,
        })
    }
}
