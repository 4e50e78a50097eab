mod account;
mod booking_intent;
mod purchasable_item;
mod purchase;
mod selection;

pub use account::{Account, NewAccount};
pub use booking_intent::{BookingIntent, IntentId};
pub use purchasable_item::{ItemKind, PurchasableItem, Variant};
pub use purchase::{NewPurchase, Purchase};
pub use selection::{BookingDetails, Quantity, QuantityError, SelectionState};
