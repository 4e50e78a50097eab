//! What the user has picked so far in a purchase dialog.

use std::num::IntErrorKind;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity {0} is too large")]
    TooLarge(String),
}

/// Number of units being purchased. Never less than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    /// Builds a quantity from any integer. Values below one become one;
    /// values that do not fit a `u32` are rejected.
    pub fn clamped(value: i64) -> Result<Self, QuantityError> {
        if value < 1 {
            warn!(requested = value, "quantity below one; clamping to 1");
            return Ok(Self::ONE);
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| QuantityError::TooLarge(value.to_string()))
    }

    /// Parses free-form numeric input. Anything that is not a whole number
    /// (empty, fractional, text) yields one.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let trimmed = input.trim();
        match trimmed.parse::<i64>() {
            Ok(value) => Self::clamped(value),
            Err(e) if *e.kind() == IntErrorKind::PosOverflow => {
                Err(QuantityError::TooLarge(trimmed.to_string()))
            }
            Err(_) => {
                warn!(input = %input, "quantity input is not a whole number; using 1");
                Ok(Self::ONE)
            }
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Stepper "+". Stops at `limit` when an availability hint is known.
    pub fn increment(
        self,
        limit: Option<u32>,
    ) -> Self {
        let next = self.0.saturating_add(1);
        match limit {
            Some(max) if next > max => self,
            _ => Self(next),
        }
    }

    /// Stepper "-". Stops at one.
    pub fn decrement(self) -> Self {
        Self(self.0.saturating_sub(1).max(1))
    }
}

impl From<u32> for Quantity {
    /// Zero becomes one.
    fn from(value: u32) -> Self {
        Self(value.max(1))
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ONE
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional notes attached to a booking (preferred date, time, requests).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub date: Option<String>,
    pub time: Option<String>,
    pub special_requests: Option<String>,
}

impl BookingDetails {
    /// True when a date has been entered (whitespace does not count).
    pub fn has_date(&self) -> bool {
        self.date.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub quantity: Quantity,
    pub variant_id: Option<String>,
    pub details: BookingDetails,
}

impl SelectionState {
    pub fn with_variant(variant_id: Option<String>) -> Self {
        Self {
            variant_id,
            ..Default::default()
        }
    }
}
