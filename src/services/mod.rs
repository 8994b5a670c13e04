pub mod aggregator;
pub mod calculator;
pub mod engine;
pub mod period;
pub mod scheduler;

pub use aggregator::Aggregator;
pub use calculator::{Calculator, PartyShareStrategy, RuleDiagnostics, DEFAULT_PLATFORM_PARTY_ID};
pub use engine::{
    amount_tolerance, totals_by_party, validate_settlement_amounts, SettlementEngine,
    SettlementPreview,
};
pub use period::SettlementCalendar;
pub use scheduler::DailySettlementScheduler;
