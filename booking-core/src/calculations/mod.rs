//! Pricing and affordability rules shared by every purchase flow.

pub mod balance_gate;
pub mod common;
pub mod pricing;

pub use balance_gate::{BalanceGate, GateDecision, TopUpRequest};
pub use pricing::{PriceQuote, PricingCalculator, PricingConfig, PricingError, SERVICE_FEE_RATE};
