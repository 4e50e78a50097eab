use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BookingDetails, PurchasableItem, Quantity, Variant};
use crate::calculations::PriceQuote;

/// Identifies one booking intent. Used as the idempotency key for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId(Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the user asked to buy, frozen at the moment they chose to proceed.
///
/// Lives only while the confirmation surface is open; discarded on settle
/// or cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingIntent {
    pub id: IntentId,
    pub item: PurchasableItem,
    pub variant: Variant,
    pub quantity: Quantity,
    pub quote: PriceQuote,
    pub details: BookingDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_ids_are_unique() {
        assert_ne!(IntentId::new(), IntentId::new());
    }

    #[test]
    fn intent_id_parses_its_display_form() {
        let id = IntentId::new();

        assert_eq!(IntentId::parse(&id.to_string()), Some(id));
        assert_eq!(IntentId::parse("not-a-uuid"), None);
    }
}
