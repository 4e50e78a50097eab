use serde::{Deserialize, Serialize};

/// One screen of a purchase dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStep {
    /// Pick the variant and quantity.
    Selection,
    /// Enter date, time and special requests.
    Details,
    /// Review price and balance, then proceed to confirmation.
    Payment,
}

impl std::fmt::Display for FlowStep {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let label = match self {
            Self::Selection => "selection",
            Self::Details => "details",
            Self::Payment => "payment",
        };
        f.write_str(label)
    }
}

/// The ordered steps a flow walks through before confirmation. Always
/// non-empty, always ends in [`FlowStep::Payment`], and never repeats a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    steps: Vec<FlowStep>,
}

impl StepPlan {
    /// Returns `None` when `steps` is empty, repeats a step, or does not end
    /// with [`FlowStep::Payment`].
    pub fn new(steps: Vec<FlowStep>) -> Option<Self> {
        if steps.last() != Some(&FlowStep::Payment) {
            return None;
        }
        for (i, step) in steps.iter().enumerate() {
            if steps[..i].contains(step) {
                return None;
            }
        }
        Some(Self { steps })
    }

    /// A single confirmation dialog opened straight from a "Book now" or
    /// "Buy ticket" button.
    pub fn single_dialog() -> Self {
        Self {
            steps: vec![FlowStep::Payment],
        }
    }

    /// Selection, then details, then payment.
    pub fn wizard() -> Self {
        Self {
            steps: vec![FlowStep::Selection, FlowStep::Details, FlowStep::Payment],
        }
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(
        &self,
        index: usize,
    ) -> Option<FlowStep> {
        self.steps.get(index).copied()
    }

    pub fn last_index(&self) -> usize {
        self.steps.len() - 1
    }

    pub fn contains(
        &self,
        step: FlowStep,
    ) -> bool {
        self.steps.contains(&step)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn presets_end_in_payment() {
        assert_eq!(StepPlan::single_dialog().steps(), &[FlowStep::Payment]);
        assert_eq!(StepPlan::wizard().get(StepPlan::wizard().last_index()), Some(FlowStep::Payment));
        assert_eq!(StepPlan::wizard().len(), 3);
    }

    #[test]
    fn custom_plan_without_details() {
        let plan = StepPlan::new(vec![FlowStep::Selection, FlowStep::Payment]).unwrap();

        assert!(!plan.contains(FlowStep::Details));
        assert_eq!(plan.last_index(), 1);
    }

    #[test]
    fn rejects_malformed_plans() {
        assert!(StepPlan::new(vec![]).is_none());
        assert!(StepPlan::new(vec![FlowStep::Payment, FlowStep::Details]).is_none());
        assert!(StepPlan::new(vec![FlowStep::Payment, FlowStep::Payment]).is_none());
    }
}
