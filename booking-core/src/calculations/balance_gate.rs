//! The check between pricing and confirmation: can the user afford it?

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calculations::common::max;

/// Outcome of comparing a total against a balance. Exactly one of the two
/// is produced for any input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateDecision {
    /// The balance covers the total.
    Proceed,
    /// The balance falls short by `shortfall` (always positive).
    InsufficientFunds { shortfall: Decimal },
}

impl GateDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }

    /// Amount missing from the balance; zero when the purchase can proceed.
    pub fn shortfall(&self) -> Decimal {
        match self {
            Self::Proceed => Decimal::ZERO,
            Self::InsufficientFunds { shortfall } => *shortfall,
        }
    }
}

/// Raised alongside [`GateDecision::InsufficientFunds`] when the user asks to
/// top up. Where the user is sent is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpRequest {
    pub shortfall: Decimal,
}

pub struct BalanceGate;

impl BalanceGate {
    /// Compares `total` against `balance`.
    ///
    /// # Example
    ///
    /// ```
    /// use rust_decimal_macros::dec;
    /// use booking_core::calculations::{BalanceGate, GateDecision};
    ///
    /// assert_eq!(BalanceGate::evaluate(dec!(75000), dec!(52500)), GateDecision::Proceed);
    /// assert_eq!(
    ///     BalanceGate::evaluate(dec!(500), dec!(52500)),
    ///     GateDecision::InsufficientFunds { shortfall: dec!(52000) },
    /// );
    /// ```
    pub fn evaluate(
        balance: Decimal,
        total: Decimal,
    ) -> GateDecision {
        let shortfall = max(Decimal::ZERO, total - balance);

        if shortfall.is_zero() {
            debug!(balance = %balance, total = %total, "balance covers total");
            GateDecision::Proceed
        } else {
            warn!(
                balance = %balance,
                total = %total,
                shortfall = %shortfall,
                "insufficient balance for purchase"
            );
            GateDecision::InsufficientFunds { shortfall }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn proceeds_when_balance_exceeds_total() {
        let decision = BalanceGate::evaluate(dec!(75000), dec!(52500));

        assert_eq!(decision, GateDecision::Proceed);
        assert_eq!(decision.shortfall(), Decimal::ZERO);
    }

    #[test]
    fn proceeds_when_balance_equals_total() {
        assert!(BalanceGate::evaluate(dec!(315.00), dec!(315.00)).is_proceed());
    }

    #[test]
    fn blocks_with_exact_shortfall() {
        let decision = BalanceGate::evaluate(dec!(500), dec!(52500));

        assert_eq!(
            decision,
            GateDecision::InsufficientFunds {
                shortfall: dec!(52000)
            }
        );
        assert!(!decision.is_proceed());
    }

    #[test]
    fn one_cent_short_is_blocked() {
        let decision = BalanceGate::evaluate(dec!(472.49), dec!(472.50));

        assert_eq!(decision.shortfall(), dec!(0.01));
    }

    #[test]
    fn zero_balance_shortfall_is_whole_total() {
        assert_eq!(
            BalanceGate::evaluate(Decimal::ZERO, dec!(52500)).shortfall(),
            dec!(52500)
        );
    }

    #[test]
    fn shortfall_matches_difference_for_many_inputs() {
        let cases = [
            (dec!(0), dec!(0)),
            (dec!(10), dec!(9.99)),
            (dec!(9.99), dec!(10)),
            (dec!(100000), dec!(52500)),
            (dec!(22500), dec!(52500)),
        ];

        for (balance, total) in cases {
            let decision = BalanceGate::evaluate(balance, total);
            if total > balance {
                assert_eq!(decision, GateDecision::InsufficientFunds { shortfall: total - balance });
            } else {
                assert_eq!(decision, GateDecision::Proceed);
            }
        }
    }
}
