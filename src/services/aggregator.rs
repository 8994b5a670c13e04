//! Settlement aggregator.
//! Folds settlement item inputs into per-party, per-period settlements.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{
    Order, PartyType, ReasonCode, Settlement, SettlementItem, SettlementItemInput, SettlementKey,
    SettlementPeriod, SettlementTotals,
};
use crate::error::AppError;
use crate::ports::{SettlementRepository, SettlementUnitOfWork};
use crate::services::period::SettlementCalendar;

type PartyGroups<'a> = BTreeMap<(PartyType, String), Vec<&'a SettlementItemInput>>;

pub struct Aggregator {
    settlements: Arc<dyn SettlementRepository>,
    calendar: SettlementCalendar,
}

impl Aggregator {
    pub fn new(settlements: Arc<dyn SettlementRepository>, calendar: SettlementCalendar) -> Self {
        Self {
            settlements,
            calendar,
        }
    }

    /// Appends `items` to the order-period settlement of each party and
    /// recomputes that settlement's totals from all of its items.
    ///
    /// All party groups of the order share one unit of work: a failure
    /// anywhere leaves nothing behind and the call can be retried as a whole.
    /// Settlement rows are locked in `(party_type, party_id)` order.
    pub async fn aggregate(
        &self,
        order: &Order,
        items: &[SettlementItemInput],
    ) -> Result<Vec<Settlement>, AppError> {
        let period = self.calendar.period_for_instant(order.order_date);
        let mut uow = self.settlements.begin().await?;
        let mut touched = Vec::new();

        for ((party_type, party_id), group) in group_by_party(items) {
            let settlement = self
                .open_settlement(uow.as_mut(), party_type, &party_id, period)
                .await?;
            let updated = append_items(uow.as_mut(), settlement, &group).await?;

            debug!(
                order_id = %order.id,
                party_type = %party_type,
                party_id = %party_id,
                settlement_id = %updated.id,
                payable = %updated.payable_amount,
                "Aggregated {} item(s)", group.len()
            );
            push_unique(&mut touched, updated);
        }
        uow.commit().await?;

        info!(
            order_id = %order.id,
            period_start = %period.start,
            "Aggregated order into {} settlement(s)", touched.len()
        );
        Ok(touched)
    }

    /// Applies reversal items to the settlements that hold the original
    /// `order_completed` items of this order, in one unit of work.
    ///
    /// Parties with no original item are skipped; a reversal never creates a
    /// settlement for a charge that was never settled. Reversals for a
    /// settlement that has already been finalized go to the party's pending
    /// settlement for the current period instead.
    pub async fn apply_reversal_for_order(
        &self,
        order: &Order,
        reversal_items: &[SettlementItemInput],
    ) -> Result<Vec<Settlement>, AppError> {
        let mut uow = self.settlements.begin().await?;
        let mut touched = Vec::new();

        for ((party_type, party_id), group) in group_by_party(reversal_items) {
            let original_id = uow
                .find_settlement_for_order(
                    order.id,
                    party_type,
                    &party_id,
                    ReasonCode::OrderCompleted,
                )
                .await?;

            let Some(original_id) = original_id else {
                warn!(
                    order_id = %order.id,
                    party_type = %party_type,
                    party_id = %party_id,
                    "No original settlement item to reverse, skipping party"
                );
                continue;
            };

            let original = uow.lock(original_id).await?;
            let target = if original.status.is_open() {
                original
            } else {
                let current = self.calendar.period_for_instant(Utc::now());
                warn!(
                    order_id = %order.id,
                    settlement_id = %original.id,
                    period_start = %current.start,
                    "Original settlement already finalized, reversing into current period"
                );
                self.open_settlement(uow.as_mut(), party_type, &party_id, current)
                    .await?
            };

            let updated = append_items(uow.as_mut(), target, &group).await?;
            push_unique(&mut touched, updated);
        }
        uow.commit().await?;

        info!(
            order_id = %order.id,
            "Applied reversal to {} settlement(s)", touched.len()
        );
        Ok(touched)
    }

    /// Locks the pending settlement for the party and `preferred` period,
    /// falling back to the current period when that one is finalized.
    async fn open_settlement(
        &self,
        uow: &mut dyn SettlementUnitOfWork,
        party_type: PartyType,
        party_id: &str,
        preferred: SettlementPeriod,
    ) -> Result<Settlement, AppError> {
        let settlement = uow
            .lock_or_create(&SettlementKey::new(party_type, party_id, preferred))
            .await?;
        if settlement.status.is_open() {
            return Ok(settlement);
        }

        let current = self.calendar.period_for_instant(Utc::now());
        if current != preferred {
            let fallback = uow
                .lock_or_create(&SettlementKey::new(party_type, party_id, current))
                .await?;
            if fallback.status.is_open() {
                warn!(
                    party_type = %party_type,
                    party_id = %party_id,
                    settlement_id = %settlement.id,
                    "Settlement already finalized, routing items to current period"
                );
                return Ok(fallback);
            }
        }

        Err(AppError::Conflict(format!(
            "no open settlement for {}:{} (settlement {} is {})",
            party_type, party_id, settlement.id, settlement.status
        )))
    }
}

/// Inserts `group` into `settlement` and saves totals summed over every item
/// the settlement holds, not only the new ones.
async fn append_items(
    uow: &mut dyn SettlementUnitOfWork,
    settlement: Settlement,
    group: &[&SettlementItemInput],
) -> Result<Settlement, AppError> {
    let now = Utc::now();
    let rows: Vec<SettlementItem> = group
        .iter()
        .map(|input| SettlementItem::from_input(settlement.id, input, now))
        .collect();
    uow.insert_items(&rows).await?;

    let all = uow.items(settlement.id).await?;
    let totals = SettlementTotals::from_items(&all);
    Ok(uow.save(&settlement.with_totals(&totals, now)).await?)
}

fn group_by_party(items: &[SettlementItemInput]) -> PartyGroups<'_> {
    let mut groups: PartyGroups<'_> = BTreeMap::new();
    for item in items {
        groups.entry(item.party_key()).or_default().push(item);
    }
    groups
}

fn push_unique(settlements: &mut Vec<Settlement>, settlement: Settlement) {
    match settlements.iter_mut().find(|s| s.id == settlement.id) {
        Some(existing) => *existing = settlement,
        None => settlements.push(settlement),
    }
}
