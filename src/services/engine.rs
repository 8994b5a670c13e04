//! Settlement engine.
//! Entry points called by the order pipeline and the daily scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::cache::NoopCacheInvalidator;
use crate::domain::{
    PartyType, ReasonCode, Settlement, SettlementItem, SettlementItemInput, SettlementTotals,
};
use crate::error::AppError;
use crate::ports::{OrderRepository, SettlementCacheInvalidator, SettlementRepository};
use crate::services::aggregator::Aggregator;
use crate::services::calculator::{Calculator, RuleDiagnostics};
use crate::services::period::SettlementCalendar;

/// Absolute tolerance when comparing stored totals with item sums: 0.01.
pub fn amount_tolerance() -> BigDecimal {
    BigDecimal::new(1.into(), 2)
}

/// Dry-run result for one order.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementPreview {
    pub order_id: Uuid,
    pub items: Vec<SettlementItemInput>,
    /// Net amount per party, keyed `"party_type:party_id"`.
    pub totals_by_party: BTreeMap<String, BigDecimal>,
    pub diagnostics: RuleDiagnostics,
}

pub struct SettlementEngine {
    orders: Arc<dyn OrderRepository>,
    settlements: Arc<dyn SettlementRepository>,
    calculator: Calculator,
    aggregator: Aggregator,
    calendar: SettlementCalendar,
    cache: Arc<dyn SettlementCacheInvalidator>,
}

impl SettlementEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        settlements: Arc<dyn SettlementRepository>,
        calculator: Calculator,
        calendar: SettlementCalendar,
    ) -> Self {
        let aggregator = Aggregator::new(settlements.clone(), calendar);
        Self {
            orders,
            settlements,
            calculator,
            aggregator,
            calendar,
            cache: Arc::new(NoopCacheInvalidator),
        }
    }

    pub fn with_cache_invalidator(mut self, cache: Arc<dyn SettlementCacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn calendar(&self) -> SettlementCalendar {
        self.calendar
    }

    /// Settles a completed order. Load and persistence failures propagate;
    /// an order without lines is a no-op.
    pub async fn run_on_order_completed(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<Settlement>, AppError> {
        let order = self.orders.get_with_lines(order_id).await?;

        if order.lines.is_empty() {
            warn!(order_id = %order_id, "Order has no lines, nothing to settle");
            return Ok(Vec::new());
        }

        let items = self.calculator.calculate_from_order_items(&order, &order.lines);
        let settlements = self.aggregator.aggregate(&order, &items).await?;

        info!(
            order_id = %order_id,
            items = items.len(),
            "Settled completed order into {} settlement(s)", settlements.len()
        );
        self.cache.settlements_changed(&settlements).await;
        Ok(settlements)
    }

    /// Reverses the settled items of a refunded or cancelled order. An order
    /// with nothing settled yet is a no-op.
    pub async fn run_on_refund(&self, order_id: Uuid) -> Result<Vec<Settlement>, AppError> {
        let order = self.orders.get_with_lines(order_id).await?;

        let originals = self
            .settlements
            .find_items_for_order(order_id, ReasonCode::OrderCompleted)
            .await?;
        if originals.is_empty() {
            warn!(
                order_id = %order_id,
                "No settled items for refunded order, nothing to reverse"
            );
            return Ok(Vec::new());
        }

        let reversals = self.calculator.calculate_reversal_for_order(&order, &originals);
        let settlements = self
            .aggregator
            .apply_reversal_for_order(&order, &reversals)
            .await?;

        info!(
            order_id = %order_id,
            reversed_items = reversals.len(),
            "Reversed refunded order in {} settlement(s)", settlements.len()
        );
        self.cache.settlements_changed(&settlements).await;
        Ok(settlements)
    }

    /// Validates and finalizes every pending settlement of `target_date`.
    ///
    /// Each settlement is handled in its own unit of work; one that fails
    /// validation or persistence is logged and skipped. Returns the number
    /// actually finalized.
    pub async fn run_daily_settlement(&self, target_date: NaiveDate) -> Result<usize, AppError> {
        let period = self.calendar.period_for_date(target_date);
        let candidates = self.settlements.find_pending_for_period(&period).await?;

        info!(
            target_date = %target_date,
            period_start = %period.start,
            period_end = %period.end,
            "Daily settlement examining {} pending settlement(s)", candidates.len()
        );

        let mut finalized = Vec::new();
        for candidate in &candidates {
            match self.finalize_settlement(candidate.id).await {
                Ok(Some(settlement)) => finalized.push(settlement),
                Ok(None) => info!(
                    settlement_id = %candidate.id,
                    "Settlement no longer pending, skipping"
                ),
                Err(e) => error!(
                    settlement_id = %candidate.id,
                    party_type = %candidate.party_type,
                    party_id = %candidate.party_id,
                    "Failed to finalize settlement: {}", e
                ),
            }
        }

        info!(
            target_date = %target_date,
            examined = candidates.len(),
            "Daily settlement finalized {} settlement(s)", finalized.len()
        );
        if !finalized.is_empty() {
            self.cache.settlements_changed(&finalized).await;
        }
        Ok(finalized.len())
    }

    /// Calculator output for an order, with per-party totals and rule
    /// counters. Nothing is persisted.
    pub async fn preview_order(&self, order_id: Uuid) -> Result<SettlementPreview, AppError> {
        let order = self.orders.get_with_lines(order_id).await?;
        let (items, diagnostics) = self
            .calculator
            .calculate_with_diagnostics(&order, &order.lines);

        Ok(SettlementPreview {
            order_id,
            totals_by_party: input_totals_by_party(&items),
            items,
            diagnostics,
        })
    }

    async fn finalize_settlement(
        &self,
        settlement_id: Uuid,
    ) -> Result<Option<Settlement>, AppError> {
        let mut uow = self.settlements.begin().await?;
        let settlement = uow.lock(settlement_id).await?;
        if !settlement.status.is_open() {
            return Ok(None);
        }

        let items = uow.items(settlement_id).await?;
        validate_settlement_amounts(&settlement, &items)?;

        let saved = uow.save(&settlement.finalized(Utc::now())).await?;
        uow.commit().await?;
        Ok(Some(saved))
    }
}

/// Checks that stored totals match the sums over the settlement's items.
/// A settlement without items is invalid.
pub fn validate_settlement_amounts(
    settlement: &Settlement,
    items: &[SettlementItem],
) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::Validation(format!(
            "settlement {} has no items",
            settlement.id
        )));
    }

    let totals = SettlementTotals::from_items(items);
    let tolerance = amount_tolerance();

    let payable_diff = (&settlement.payable_amount - &totals.net).abs();
    if payable_diff > tolerance {
        return Err(AppError::Validation(format!(
            "settlement {} payable {} does not match item net sum {}",
            settlement.id, settlement.payable_amount, totals.net
        )));
    }

    let commission_diff = (&settlement.total_commission_amount - &totals.commission).abs();
    if commission_diff > tolerance {
        return Err(AppError::Validation(format!(
            "settlement {} commission {} does not match item commission sum {}",
            settlement.id, settlement.total_commission_amount, totals.commission
        )));
    }

    Ok(())
}

/// Payable per party, keyed `"party_type:party_id"`.
pub fn totals_by_party(settlements: &[Settlement]) -> BTreeMap<String, BigDecimal> {
    let mut totals = BTreeMap::new();
    for settlement in settlements {
        add_to_party(
            &mut totals,
            settlement.party_type,
            &settlement.party_id,
            &settlement.payable_amount,
        );
    }
    totals
}

fn input_totals_by_party(items: &[SettlementItemInput]) -> BTreeMap<String, BigDecimal> {
    let mut totals = BTreeMap::new();
    for item in items {
        add_to_party(&mut totals, item.party_type, &item.party_id, &item.net_amount);
    }
    totals
}

fn add_to_party(
    totals: &mut BTreeMap<String, BigDecimal>,
    party_type: PartyType,
    party_id: &str,
    amount: &BigDecimal,
) {
    let entry = totals
        .entry(format!("{}:{}", party_type, party_id))
        .or_insert_with(|| BigDecimal::from(0));
    *entry = &*entry + amount;
}
