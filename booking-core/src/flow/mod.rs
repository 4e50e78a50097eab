//! Purchase dialogs: step navigation, confirmation, settlement and the
//! shared session balance.

pub mod balance_store;
pub mod notice;
pub mod purchase_flow;
pub mod settlement;
pub mod steps;

pub use balance_store::{BalanceError, BalanceStore, Reservation};
pub use notice::{Notice, NoticeLevel};
pub use purchase_flow::{
    ConfirmationSummary, FlowError, FlowState, PurchaseFlow, ValidationError,
};
pub use settlement::{
    DEFAULT_SIMULATED_DELAY, LedgerSettlement, SettlementError, SettlementGateway,
    SettlementReceipt, SettlementRequest, SimulatedSettlement,
};
pub use steps::{FlowStep, StepPlan};
