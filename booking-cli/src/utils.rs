use rust_decimal::Decimal;
use thiserror::Error;

/// Error returned when a string cannot be used as a money amount.
#[derive(Debug, Error, PartialEq)]
pub enum ParseAmountError {
    #[error("invalid amount '{input}': {reason}")]
    Invalid { input: String, reason: String },

    #[error("amount must be greater than zero, got '{0}'")]
    NotPositive(String),
}

/// Normalizes input for decimal parsing: trims whitespace, a leading `$`,
/// and commas (thousands separator).
fn normalize_decimal_input(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('$')
        .unwrap_or(trimmed)
        .replace(',', "")
}

/// Parses a string into a [`Decimal`].
///
/// Accepts `"52000"`, `"52,000.00"` and `"$52,000"`.
pub fn parse_decimal(s: &str) -> Result<Decimal, ParseAmountError> {
    let normalized = normalize_decimal_input(s);
    normalized.parse().map_err(|e: rust_decimal::Error| {
        tracing::warn!(input = %s, "invalid decimal: {}", e);
        ParseAmountError::Invalid {
            input: s.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Parses a strictly positive amount, e.g. a top-up. Usable as a clap
/// `value_parser`.
pub fn parse_amount(s: &str) -> Result<Decimal, ParseAmountError> {
    let amount = parse_decimal(s)?;
    if amount <= Decimal::ZERO {
        return Err(ParseAmountError::NotPositive(s.to_string()));
    }
    Ok(amount)
}
