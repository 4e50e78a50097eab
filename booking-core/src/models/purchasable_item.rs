use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculations::PricingError;
use crate::calculations::common::round_half_up;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    CelebrityBooking,
    Event,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CelebrityBooking => "celebrity",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "celebrity" => Some(Self::CelebrityBooking),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

/// A booking type (celebrities) or ticket type (events).
///
/// The variant scales the item's base price; a multiplier of `1` is the
/// standard offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub price_multiplier: Decimal,
}

impl Variant {
    pub fn standard() -> Self {
        Self {
            id: "standard".to_string(),
            name: "Standard".to_string(),
            price_multiplier: Decimal::ONE,
        }
    }
}

/// Something a user can pay for with their balance: a celebrity booking or
/// an event ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasableItem {
    pub id: i64,
    pub kind: ItemKind,
    pub name: String,
    /// Base price of one unit, before the variant multiplier.
    pub unit_price: Decimal,
    /// Advisory stock level. Never enforced client-side.
    pub available_quantity: Option<u32>,
    pub variants: Vec<Variant>,
}

impl PurchasableItem {
    pub fn variant(
        &self,
        id: &str,
    ) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// The variant preselected when a purchase dialog opens: the first
    /// listed one.
    pub fn default_variant(&self) -> Option<&Variant> {
        self.variants.first()
    }

    /// Unit price for `variant`, rounded to cents.
    pub fn unit_price_for(
        &self,
        variant: &Variant,
    ) -> Result<Decimal, PricingError> {
        self.unit_price
            .checked_mul(variant.price_multiplier)
            .map(round_half_up)
            .ok_or(PricingError::Overflow("unit price"))
    }
}
