//! Framework-agnostic settlement domain.

pub mod commission;
pub mod order;
pub mod settlement;

pub use commission::{
    CommissionRule, CommissionRuleSet, CommissionTier, RuleScope, ScopedCommissionRule,
};
pub use order::{Order, OrderLine};
pub use settlement::{
    PartyType, ReasonCode, Settlement, SettlementItem, SettlementItemInput, SettlementKey,
    SettlementPeriod, SettlementStatus, SettlementTotals,
};
