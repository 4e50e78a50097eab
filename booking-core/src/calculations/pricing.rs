//! Price quotes for bookings and tickets.
//!
//! Every purchase flow prices a selection the same way:
//!
//! | Step | Description |
//! |------|-------------|
//! | 1    | Quantity, clamped to at least 1 |
//! | 2    | Subtotal: unit price × quantity |
//! | 3    | Service fee: subtotal × 5%, rounded to cents |
//! | 4    | Total: subtotal + service fee |
//!
//! Quotes are never cached. Callers recompute whenever the quantity or the
//! selected variant changes; the arithmetic is cheap and pure.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use booking_core::calculations::PricingCalculator;
//! use booking_core::models::Quantity;
//!
//! let quote = PricingCalculator::standard().quote(dec!(50000), Quantity::ONE).unwrap();
//!
//! assert_eq!(quote.subtotal, dec!(50000));
//! assert_eq!(quote.service_fee, dec!(2500.00));
//! assert_eq!(quote.total, dec!(52500.00));
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::calculations::common::round_half_up;
use crate::models::Quantity;

/// Surcharge applied to every subtotal.
pub const SERVICE_FEE_RATE: Decimal = dec!(0.05);

/// Errors from configuring the calculator or from pricing a selection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// The service fee rate must be between 0 and 1.
    #[error("service fee rate must be between 0 and 1, got {0}")]
    InvalidServiceFeeRate(Decimal),

    /// An intermediate amount does not fit a `Decimal`.
    #[error("{0} is too large to price")]
    Overflow(&'static str),
}

/// Configuration for [`PricingCalculator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Fraction of the subtotal charged as a service fee.
    pub service_fee_rate: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            service_fee_rate: SERVICE_FEE_RATE,
        }
    }
}

impl PricingConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::InvalidServiceFeeRate`] if the rate is not in [0, 1].
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.service_fee_rate < Decimal::ZERO || self.service_fee_rate > Decimal::ONE {
            return Err(PricingError::InvalidServiceFeeRate(
                self.service_fee_rate,
            ));
        }
        Ok(())
    }
}

/// A priced selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub unit_price: Decimal,
    pub quantity: Quantity,
    /// `unit_price × quantity`.
    pub subtotal: Decimal,
    pub service_fee_rate: Decimal,
    /// `subtotal × service_fee_rate`, rounded half-up to cents.
    pub service_fee: Decimal,
    /// `subtotal + service_fee`.
    pub total: Decimal,
}

/// Calculator for price quotes.
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    config: PricingConfig,
}

impl PricingCalculator {
    /// Creates a calculator after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError`] if the configuration is invalid.
    pub fn new(config: PricingConfig) -> Result<Self, PricingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The calculator used by every purchase flow: a flat 5% service fee.
    pub fn standard() -> Self {
        Self {
            config: PricingConfig::default(),
        }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Prices `quantity` units at `unit_price`.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::Overflow`] if the subtotal, fee or total
    /// cannot be represented.
    pub fn quote(
        &self,
        unit_price: Decimal,
        quantity: Quantity,
    ) -> Result<PriceQuote, PricingError> {
        let subtotal = self.subtotal(unit_price, quantity)?;
        let service_fee = self.service_fee(subtotal)?;
        let total = subtotal
            .checked_add(service_fee)
            .ok_or(PricingError::Overflow("total"))?;

        debug!(
            unit_price = %unit_price,
            quantity = quantity.get(),
            subtotal = %subtotal,
            service_fee = %service_fee,
            total = %total,
            "priced selection"
        );

        Ok(PriceQuote {
            unit_price,
            quantity,
            subtotal,
            service_fee_rate: self.config.service_fee_rate,
            service_fee,
            total,
        })
    }

    fn subtotal(
        &self,
        unit_price: Decimal,
        quantity: Quantity,
    ) -> Result<Decimal, PricingError> {
        unit_price
            .checked_mul(Decimal::from(quantity.get()))
            .ok_or(PricingError::Overflow("subtotal"))
    }

    fn service_fee(
        &self,
        subtotal: Decimal,
    ) -> Result<Decimal, PricingError> {
        subtotal
            .checked_mul(self.config.service_fee_rate)
            .map(round_half_up)
            .ok_or(PricingError::Overflow("service fee"))
    }
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::standard()
    }
}
