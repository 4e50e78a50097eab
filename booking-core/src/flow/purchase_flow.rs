//! The purchase-intent state machine behind every booking and ticket dialog.
//!
//! ```text
//!            proceed (gate: Proceed)          confirm
//!   Idle ─────────────────────────────▶ AwaitingConfirmation ──────────▶ Processing
//!    ▲  ▲                                   │        ▲                     │     │
//!    │  └──────────── cancel ───────────────┘        └── settlement fails ─┘     │
//!    │                                                                           ▼
//!    └────────────────────────────── reset ─────────────────────────────────  Settled
//! ```
//!
//! * Selection edits and step navigation are only accepted in `Idle`.
//! * `proceed` prices the selection and runs the balance gate; on a
//!   shortfall the flow stays in `Idle` and queues a notice.
//! * `confirm` re-runs the gate by reserving the total in the shared
//!   [`BalanceStore`], then hands the intent to the [`SettlementGateway`].
//!   The reservation is committed only after the gateway confirms, so a
//!   failed settlement leaves the balance unchanged.
//! * A settled flow refuses a second `confirm`; the balance is debited at
//!   most once per intent.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::balance_store::{BalanceError, BalanceStore};
use super::notice::Notice;
use super::settlement::{SettlementError, SettlementGateway, SettlementReceipt, SettlementRequest};
use super::steps::{FlowStep, StepPlan};
use crate::calculations::common::format_currency;
use crate::calculations::{
    BalanceGate, GateDecision, PriceQuote, PricingCalculator, PricingError, TopUpRequest,
};
use crate::models::{
    BookingDetails, BookingIntent, IntentId, PurchasableItem, Quantity, QuantityError,
    SelectionState, Variant,
};

/// Problems with what the user entered. Recovered locally by fixing the
/// named field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("please select a booking or ticket type")]
    MissingVariant,

    #[error("unknown booking or ticket type '{0}'")]
    UnknownVariant(String),

    #[error("{0} is required")]
    MissingDetail(&'static str),

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("the selection cannot change while a purchase is being confirmed")]
    Locked,

    #[error("expected to be on the {expected} step, currently on {actual}")]
    WrongStep { expected: FlowStep, actual: FlowStep },

    #[error("already on the final step")]
    AtFinalStep,

    #[error("already on the first step")]
    AtFirstStep,

    #[error("there is no purchase awaiting confirmation")]
    NotAwaitingConfirmation,

    #[error("the purchase is already being processed")]
    AlreadyProcessing,

    #[error("this purchase has already been settled")]
    AlreadySettled,

    #[error("insufficient balance: short by {shortfall}")]
    InsufficientFunds { shortfall: Decimal },

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    /// Editing the selection on `plan[step]`.
    Idle { step: usize },
    /// The summary is on screen; waiting for confirm or cancel.
    AwaitingConfirmation { intent: BookingIntent },
    /// Settlement is in flight. Confirm and cancel are disabled.
    Processing { intent: BookingIntent },
    Settled {
        intent: BookingIntent,
        receipt: SettlementReceipt,
    },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "idle",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
            Self::Processing { .. } => "processing",
            Self::Settled { .. } => "settled",
        }
    }
}

/// Read-only view rendered on the confirmation surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationSummary {
    pub intent_id: IntentId,
    pub item_name: String,
    pub variant_name: String,
    pub quantity: Quantity,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
    pub current_balance: Decimal,
    pub projected_balance: Decimal,
    pub details: BookingDetails,
}

pub struct PurchaseFlow {
    item: PurchasableItem,
    plan: StepPlan,
    selection: SelectionState,
    state: FlowState,
    pricing: PricingCalculator,
    balance: BalanceStore,
    gateway: Arc<dyn SettlementGateway>,
    notices: Vec<Notice>,
}

impl PurchaseFlow {
    /// Opens a flow for `item` on the first step of `plan`, with the item's
    /// default variant preselected.
    pub fn new(
        item: PurchasableItem,
        plan: StepPlan,
        balance: BalanceStore,
        gateway: Arc<dyn SettlementGateway>,
    ) -> Self {
        let selection = SelectionState::with_variant(item.default_variant().map(|v| v.id.clone()));
        Self {
            item,
            plan,
            selection,
            state: FlowState::Idle { step: 0 },
            pricing: PricingCalculator::standard(),
            balance,
            gateway,
            notices: Vec::new(),
        }
    }

    pub fn with_pricing(
        mut self,
        pricing: PricingCalculator,
    ) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn item(&self) -> &PurchasableItem {
        &self.item
    }

    pub fn plan(&self) -> &StepPlan {
        &self.plan
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn balance(&self) -> &BalanceStore {
        &self.balance
    }

    /// The step on screen, while the selection is still editable.
    pub fn current_step(&self) -> Option<FlowStep> {
        match self.state {
            FlowState::Idle { step } => self.plan.get(step),
            _ => None,
        }
    }

    /// Drains queued notices, oldest first.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn idle_step(&self) -> Result<usize, FlowError> {
        match &self.state {
            FlowState::Idle { step } => Ok(*step),
            FlowState::Settled { .. } => Err(FlowError::AlreadySettled),
            _ => Err(FlowError::Locked),
        }
    }

    // ── selection ────────────────────────────────────────────────────────

    pub fn increment(&mut self) -> Result<Quantity, FlowError> {
        self.idle_step()?;
        self.selection.quantity = self.selection.quantity.increment(self.item.available_quantity);
        Ok(self.selection.quantity)
    }

    pub fn decrement(&mut self) -> Result<Quantity, FlowError> {
        self.idle_step()?;
        self.selection.quantity = self.selection.quantity.decrement();
        Ok(self.selection.quantity)
    }

    /// Sets the quantity from a numeric field; values below one become one.
    /// A value too large to count leaves the selection unchanged.
    pub fn set_quantity(
        &mut self,
        quantity: i64,
    ) -> Result<Quantity, FlowError> {
        self.idle_step()?;
        self.selection.quantity = Quantity::clamped(quantity).map_err(ValidationError::from)?;
        Ok(self.selection.quantity)
    }

    /// Sets the quantity from raw text; anything but a whole number becomes
    /// one. An oversized whole number leaves the selection unchanged.
    pub fn set_quantity_input(
        &mut self,
        input: &str,
    ) -> Result<Quantity, FlowError> {
        self.idle_step()?;
        self.selection.quantity = Quantity::parse(input).map_err(ValidationError::from)?;
        Ok(self.selection.quantity)
    }

    pub fn select_variant(
        &mut self,
        variant_id: &str,
    ) -> Result<(), FlowError> {
        self.idle_step()?;
        if self.item.variant(variant_id).is_none() {
            return Err(ValidationError::UnknownVariant(variant_id.to_string()).into());
        }
        self.selection.variant_id = Some(variant_id.to_string());
        Ok(())
    }

    pub fn set_details(
        &mut self,
        details: BookingDetails,
    ) -> Result<(), FlowError> {
        self.idle_step()?;
        self.selection.details = details;
        Ok(())
    }

    pub fn selected_variant(&self) -> Result<&Variant, ValidationError> {
        let id = self
            .selection
            .variant_id
            .as_deref()
            .ok_or(ValidationError::MissingVariant)?;
        self.item
            .variant(id)
            .ok_or_else(|| ValidationError::UnknownVariant(id.to_string()))
    }

    /// Prices the current selection. Recomputed on every call.
    pub fn quote(&self) -> Result<PriceQuote, ValidationError> {
        let variant = self.selected_variant()?;
        let unit_price = self.item.unit_price_for(variant)?;
        Ok(self.pricing.quote(unit_price, self.selection.quantity)?)
    }

    fn validate_step(
        &self,
        step: FlowStep,
    ) -> Result<(), ValidationError> {
        match step {
            FlowStep::Selection => self.selected_variant().map(|_| ()),
            FlowStep::Details if !self.selection.details.has_date() => {
                Err(ValidationError::MissingDetail("date"))
            }
            FlowStep::Details | FlowStep::Payment => Ok(()),
        }
    }

    // ── navigation ───────────────────────────────────────────────────────

    /// Validates the current step and moves to the next one.
    pub fn advance(&mut self) -> Result<FlowStep, FlowError> {
        let step = self.idle_step()?;
        if step >= self.plan.last_index() {
            return Err(FlowError::AtFinalStep);
        }
        if let Some(current) = self.plan.get(step) {
            self.validate_step(current)?;
        }
        self.state = FlowState::Idle { step: step + 1 };
        self.plan.get(step + 1).ok_or(FlowError::AtFinalStep)
    }

    /// Moves to the previous step without validating.
    pub fn back(&mut self) -> Result<FlowStep, FlowError> {
        let step = self.idle_step()?;
        if step == 0 {
            return Err(FlowError::AtFirstStep);
        }
        self.state = FlowState::Idle { step: step - 1 };
        self.plan.get(step - 1).ok_or(FlowError::AtFirstStep)
    }

    // ── confirmation ─────────────────────────────────────────────────────

    /// Validates the whole selection and runs the balance gate.
    ///
    /// On [`GateDecision::Proceed`] a fresh [`BookingIntent`] is created and
    /// the flow waits for confirmation. On
    /// [`GateDecision::InsufficientFunds`] the flow stays where it is and an
    /// informational notice is queued.
    pub fn proceed(&mut self) -> Result<GateDecision, FlowError> {
        let step = self.idle_step()?;
        let last = self.plan.last_index();
        if step != last {
            return Err(FlowError::WrongStep {
                expected: FlowStep::Payment,
                actual: self.plan.get(step).unwrap_or(FlowStep::Payment),
            });
        }

        for &s in self.plan.steps() {
            self.validate_step(s)?;
        }

        let variant = self.selected_variant()?.clone();
        let quote = self.quote()?;
        let decision = BalanceGate::evaluate(self.balance.available(), quote.total);

        match decision {
            GateDecision::Proceed => {
                let intent = BookingIntent {
                    id: IntentId::new(),
                    item: self.item.clone(),
                    variant,
                    quantity: self.selection.quantity,
                    quote,
                    details: self.selection.details.clone(),
                };
                info!(
                    intent_id = %intent.id,
                    item_id = self.item.id,
                    total = %intent.quote.total,
                    "awaiting confirmation"
                );
                self.state = FlowState::AwaitingConfirmation { intent };
            }
            GateDecision::InsufficientFunds { shortfall } => {
                self.notices.push(Notice::info(format!(
                    "Insufficient balance. You need {} more to complete this purchase.",
                    format_currency(shortfall)
                )));
            }
        }

        Ok(decision)
    }

    /// What the user would need to add to afford the current selection, if
    /// anything.
    pub fn top_up_request(&self) -> Option<TopUpRequest> {
        let quote = self.quote().ok()?;
        match BalanceGate::evaluate(self.balance.available(), quote.total) {
            GateDecision::Proceed => None,
            GateDecision::InsufficientFunds { shortfall } => Some(TopUpRequest { shortfall }),
        }
    }

    /// The intent being confirmed or processed.
    pub fn intent(&self) -> Option<&BookingIntent> {
        match &self.state {
            FlowState::AwaitingConfirmation { intent }
            | FlowState::Processing { intent }
            | FlowState::Settled { intent, .. } => Some(intent),
            FlowState::Idle { .. } => None,
        }
    }

    pub fn summary(&self) -> Option<ConfirmationSummary> {
        let FlowState::AwaitingConfirmation { intent } = &self.state else {
            return None;
        };
        let current_balance = self.balance.available();
        Some(ConfirmationSummary {
            intent_id: intent.id,
            item_name: intent.item.name.clone(),
            variant_name: intent.variant.name.clone(),
            quantity: intent.quantity,
            unit_price: intent.quote.unit_price,
            subtotal: intent.quote.subtotal,
            service_fee: intent.quote.service_fee,
            total: intent.quote.total,
            current_balance,
            projected_balance: current_balance - intent.quote.total,
            details: intent.details.clone(),
        })
    }

    pub fn receipt(&self) -> Option<&SettlementReceipt> {
        match &self.state {
            FlowState::Settled { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    /// Discards the pending intent and returns to the payment step with the
    /// selection intact. Only possible before processing starts.
    pub fn cancel(&mut self) -> Result<(), FlowError> {
        match &self.state {
            FlowState::AwaitingConfirmation { intent } => {
                info!(intent_id = %intent.id, "purchase cancelled");
                self.state = FlowState::Idle {
                    step: self.plan.last_index(),
                };
                Ok(())
            }
            FlowState::Processing { .. } => Err(FlowError::AlreadyProcessing),
            FlowState::Settled { .. } => Err(FlowError::AlreadySettled),
            FlowState::Idle { .. } => Err(FlowError::NotAwaitingConfirmation),
        }
    }

    /// Commits the pending intent.
    ///
    /// # Errors
    ///
    /// * [`FlowError::AlreadySettled`] / [`FlowError::AlreadyProcessing`] /
    ///   [`FlowError::NotAwaitingConfirmation`] when there is nothing to
    ///   confirm. Nothing changes.
    /// * [`FlowError::InsufficientFunds`] when the balance dropped since
    ///   `proceed`. The intent is discarded and the flow returns to `Idle`.
    /// * [`FlowError::Settlement`] when the gateway fails. The flow returns
    ///   to `AwaitingConfirmation` and the balance is unchanged.
    pub async fn confirm(&mut self) -> Result<SettlementReceipt, FlowError> {
        let intent = match &self.state {
            FlowState::AwaitingConfirmation { intent } => intent.clone(),
            FlowState::Processing { .. } => return Err(FlowError::AlreadyProcessing),
            FlowState::Settled { .. } => return Err(FlowError::AlreadySettled),
            FlowState::Idle { .. } => return Err(FlowError::NotAwaitingConfirmation),
        };
        let total = intent.quote.total;

        self.state = FlowState::Processing {
            intent: intent.clone(),
        };
        info!(intent_id = %intent.id, total = %total, "processing purchase");

        let reservation = match self.balance.reserve(total) {
            Ok(reservation) => reservation,
            Err(BalanceError::InsufficientFunds { shortfall, .. }) => {
                return Err(self.abort_for_shortfall(&intent, shortfall));
            }
            Err(BalanceError::NegativeAmount(amount)) => {
                // Totals are never negative; treat as a backend fault.
                self.state = FlowState::AwaitingConfirmation { intent };
                return Err(SettlementError::Backend(format!("invalid total {amount}")).into());
            }
        };

        let request = SettlementRequest::from(&intent);
        match self.gateway.settle(&request).await {
            Ok(receipt) => {
                let remaining = reservation.commit();
                info!(
                    intent_id = %intent.id,
                    reference = %receipt.reference,
                    remaining = %remaining,
                    "purchase settled"
                );
                self.notices.push(Notice::success(format!(
                    "Payment successful! {} was deducted from your balance. Remaining balance: {}.",
                    format_currency(receipt.amount_paid),
                    format_currency(remaining)
                )));
                self.state = FlowState::Settled {
                    intent,
                    receipt: receipt.clone(),
                };
                Ok(receipt)
            }
            Err(error) => {
                reservation.release();
                warn!(intent_id = %intent.id, error = %error, "settlement failed; balance unchanged");
                self.notices
                    .push(Notice::error(format!("Payment failed: {error}. Your balance was not charged.")));
                self.state = FlowState::AwaitingConfirmation { intent };
                Err(error.into())
            }
        }
    }

    fn abort_for_shortfall(
        &mut self,
        intent: &BookingIntent,
        shortfall: Decimal,
    ) -> FlowError {
        warn!(
            intent_id = %intent.id,
            shortfall = %shortfall,
            "balance changed before confirmation; purchase aborted"
        );
        self.notices.push(Notice::info(format!(
            "Your balance changed. You need {} more to complete this purchase.",
            format_currency(shortfall)
        )));
        self.state = FlowState::Idle {
            step: self.plan.last_index(),
        };
        FlowError::InsufficientFunds { shortfall }
    }

    /// Starts over with a fresh selection after a settled purchase.
    pub fn reset(&mut self) -> Result<(), FlowError> {
        match self.state {
            FlowState::Settled { .. } | FlowState::Idle { .. } => {
                self.selection =
                    SelectionState::with_variant(self.item.default_variant().map(|v| v.id.clone()));
                self.state = FlowState::Idle { step: 0 };
                Ok(())
            }
            FlowState::AwaitingConfirmation { .. } | FlowState::Processing { .. } => {
                Err(FlowError::Locked)
            }
        }
    }
}
