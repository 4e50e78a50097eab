use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::IntentId;

/// A settled purchase as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: i64,
    pub intent_id: IntentId,
    pub account_id: i64,
    pub item_id: i64,
    pub variant_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

/// For recording new purchases (no id or timestamp)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub intent_id: IntentId,
    pub account_id: i64,
    pub item_id: i64,
    pub variant_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
}
