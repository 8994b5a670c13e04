//! Settlement domain records.
//! Plain data plus pure helpers; persistence lives behind the ports.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Party entitled to a share of an order's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyType {
    Seller,
    Supplier,
    Platform,
    Partner,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyType::Seller => "seller",
            PartyType::Supplier => "supplier",
            PartyType::Platform => "platform",
            PartyType::Partner => "partner",
        }
    }
}

impl fmt::Display for PartyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seller" => Ok(PartyType::Seller),
            "supplier" => Ok(PartyType::Supplier),
            "platform" => Ok(PartyType::Platform),
            "partner" => Ok(PartyType::Partner),
            other => Err(format!("unknown party type '{}'", other)),
        }
    }
}

/// Why a settlement item exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    OrderCompleted,
    RefundReversal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::OrderCompleted => "order_completed",
            ReasonCode::RefundReversal => "refund_reversal",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_completed" => Ok(ReasonCode::OrderCompleted),
            "refund_reversal" => Ok(ReasonCode::RefundReversal),
            other => Err(format!("unknown reason code '{}'", other)),
        }
    }
}

/// Settlement lifecycle. `Pending` is the draft state; `Processing` is
/// terminal here and is reached only through the daily batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Processing,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
        }
    }

    /// Only pending settlements accept new items.
    pub fn is_open(&self) -> bool {
        matches!(self, SettlementStatus::Pending)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SettlementStatus::Pending),
            "processing" => Ok(SettlementStatus::Processing),
            other => Err(format!("unknown settlement status '{}'", other)),
        }
    }
}

/// Inclusive settlement window, stored as UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettlementPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SettlementPeriod {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Identity of a settlement row: one per party per period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettlementKey {
    pub party_type: PartyType,
    pub party_id: String,
    pub period: SettlementPeriod,
}

impl SettlementKey {
    pub fn new(
        party_type: PartyType,
        party_id: impl Into<String>,
        period: SettlementPeriod,
    ) -> Self {
        Self {
            party_type,
            party_id: party_id.into(),
            period,
        }
    }
}

/// Transient calculator output. `net_amount` is always
/// `gross_amount - commission_amount`; the constructors keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementItemInput {
    pub party_type: PartyType,
    pub party_id: String,
    pub order_id: Uuid,
    pub order_line_id: Uuid,
    pub gross_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub reason_code: ReasonCode,
    pub product_name: Option<String>,
    pub quantity: i32,
}

impl SettlementItemInput {
    pub fn new(
        party_type: PartyType,
        party_id: impl Into<String>,
        order_id: Uuid,
        order_line_id: Uuid,
        gross_amount: BigDecimal,
        commission_amount: BigDecimal,
        reason_code: ReasonCode,
    ) -> Self {
        let net_amount = &gross_amount - &commission_amount;
        Self {
            party_type,
            party_id: party_id.into(),
            order_id,
            order_line_id,
            gross_amount,
            commission_amount,
            net_amount,
            reason_code,
            product_name: None,
            quantity: 0,
        }
    }

    pub fn with_product(mut self, product_name: impl Into<String>, quantity: i32) -> Self {
        self.product_name = Some(product_name.into());
        self.quantity = quantity;
        self
    }

    /// Same party and line, every amount multiplied by -1.
    pub fn negated(&self, reason_code: ReasonCode) -> Self {
        Self {
            gross_amount: -self.gross_amount.clone(),
            commission_amount: -self.commission_amount.clone(),
            net_amount: -self.net_amount.clone(),
            reason_code,
            ..self.clone()
        }
    }

    /// Folds another share for the same party and line into this one.
    pub fn absorb(&mut self, other: &SettlementItemInput) {
        self.gross_amount = &self.gross_amount + &other.gross_amount;
        self.commission_amount = &self.commission_amount + &other.commission_amount;
        self.net_amount = &self.gross_amount - &self.commission_amount;
    }

    pub fn party_key(&self) -> (PartyType, String) {
        (self.party_type, self.party_id.clone())
    }
}

/// Durable record of one settlement item input. Never edited after insert;
/// corrections are new items with a reversal reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementItem {
    pub id: Uuid,
    pub settlement_id: Uuid,
    pub order_id: Uuid,
    pub order_line_id: Uuid,
    pub party_type: PartyType,
    pub party_id: String,
    pub gross_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub reason_code: ReasonCode,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl SettlementItem {
    pub fn from_input(
        settlement_id: Uuid,
        input: &SettlementItemInput,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            settlement_id,
            order_id: input.order_id,
            order_line_id: input.order_line_id,
            party_type: input.party_type,
            party_id: input.party_id.clone(),
            gross_amount: input.gross_amount.clone(),
            commission_amount: input.commission_amount.clone(),
            net_amount: input.net_amount.clone(),
            reason_code: input.reason_code,
            product_name: input.product_name.clone(),
            quantity: input.quantity,
            created_at,
        }
    }

    pub fn to_input(&self) -> SettlementItemInput {
        SettlementItemInput {
            party_type: self.party_type,
            party_id: self.party_id.clone(),
            order_id: self.order_id,
            order_line_id: self.order_line_id,
            gross_amount: self.gross_amount.clone(),
            commission_amount: self.commission_amount.clone(),
            net_amount: self.net_amount.clone(),
            reason_code: self.reason_code,
            product_name: self.product_name.clone(),
            quantity: self.quantity,
        }
    }
}

/// Sums over a settlement's items.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementTotals {
    pub gross: BigDecimal,
    pub commission: BigDecimal,
    pub net: BigDecimal,
    pub count: usize,
}

impl SettlementTotals {
    pub fn from_items(items: &[SettlementItem]) -> Self {
        let zero = || BigDecimal::from(0);
        items.iter().fold(
            SettlementTotals {
                gross: zero(),
                commission: zero(),
                net: zero(),
                count: 0,
            },
            |acc, item| SettlementTotals {
                gross: acc.gross + &item.gross_amount,
                commission: acc.commission + &item.commission_amount,
                net: acc.net + &item.net_amount,
                count: acc.count + 1,
            },
        )
    }
}

/// Per-party payable for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub party_type: PartyType,
    pub party_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Informational; not checked by validation.
    pub total_gross_amount: BigDecimal,
    pub total_commission_amount: BigDecimal,
    pub payable_amount: BigDecimal,
    pub item_count: i32,
    pub status: SettlementStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Settlement {
    /// Fresh draft with zeroed totals.
    pub fn pending(key: &SettlementKey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            party_type: key.party_type,
            party_id: key.party_id.clone(),
            period_start: key.period.start,
            period_end: key.period.end,
            total_gross_amount: BigDecimal::from(0),
            total_commission_amount: BigDecimal::from(0),
            payable_amount: BigDecimal::from(0),
            item_count: 0,
            status: SettlementStatus::Pending,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    pub fn key(&self) -> SettlementKey {
        SettlementKey::new(self.party_type, self.party_id.clone(), self.period())
    }

    pub fn period(&self) -> SettlementPeriod {
        SettlementPeriod {
            start: self.period_start,
            end: self.period_end,
        }
    }

    /// Copy carrying totals recomputed from the full item set.
    pub fn with_totals(&self, totals: &SettlementTotals, at: DateTime<Utc>) -> Self {
        Self {
            total_gross_amount: totals.gross.clone(),
            total_commission_amount: totals.commission.clone(),
            payable_amount: totals.net.clone(),
            item_count: totals.count as i32,
            metadata: serde_json::json!({
                "items_count": totals.count,
                "engine": "v2",
            }),
            updated_at: at,
            ..self.clone()
        }
    }

    pub fn finalized(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: SettlementStatus::Processing,
            finalized_at: Some(at),
            updated_at: at,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn period() -> SettlementPeriod {
        SettlementPeriod {
            start: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 59).unwrap()
                + chrono::Duration::milliseconds(999),
        }
    }

    fn input(gross: i32, commission: i32) -> SettlementItemInput {
        SettlementItemInput::new(
            PartyType::Seller,
            "seller-1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            BigDecimal::from(gross),
            BigDecimal::from(commission),
            ReasonCode::OrderCompleted,
        )
    }

    #[test]
    fn test_input_net_is_gross_minus_commission() {
        let item = input(200, 40);
        assert_eq!(item.net_amount, BigDecimal::from(160));
    }

    #[test]
    fn test_negated_flips_every_amount() {
        let item = input(200, 40);
        let reversed = item.negated(ReasonCode::RefundReversal);
        assert_eq!(reversed.gross_amount, BigDecimal::from(-200));
        assert_eq!(reversed.commission_amount, BigDecimal::from(-40));
        assert_eq!(reversed.net_amount, BigDecimal::from(-160));
        assert_eq!(reversed.reason_code, ReasonCode::RefundReversal);
        assert_eq!(reversed.order_line_id, item.order_line_id);
    }

    #[test]
    fn test_absorb_keeps_net_invariant() {
        let mut item = input(100, 10);
        item.absorb(&input(-5, 0));
        assert_eq!(item.gross_amount, BigDecimal::from(95));
        assert_eq!(item.net_amount, BigDecimal::from(85));
    }

    #[test]
    fn test_totals_from_items() {
        let key = SettlementKey::new(PartyType::Seller, "seller-1", period());
        let settlement = Settlement::pending(&key);
        let items: Vec<SettlementItem> = [input(100, 20), input(100, 20)]
            .iter()
            .map(|i| SettlementItem::from_input(settlement.id, i, Utc::now()))
            .collect();

        let totals = SettlementTotals::from_items(&items);
        let updated = settlement.with_totals(&totals, Utc::now());

        assert_eq!(updated.payable_amount, BigDecimal::from(160));
        assert_eq!(updated.total_commission_amount, BigDecimal::from(40));
        assert_eq!(updated.total_gross_amount, BigDecimal::from(200));
        assert_eq!(updated.item_count, 2);
        assert_eq!(updated.metadata["items_count"], 2);
    }

    #[test]
    fn test_finalized_moves_to_processing() {
        let key = SettlementKey::new(PartyType::Platform, "platform", period());
        let settlement = Settlement::pending(&key);
        let at = Utc::now();
        let done = settlement.finalized(at);
        assert_eq!(done.status, SettlementStatus::Processing);
        assert_eq!(done.finalized_at, Some(at));
        assert!(!done.status.is_open());
    }

    #[test]
    fn test_period_contains_is_inclusive() {
        let p = period();
        assert!(p.contains(p.start));
        assert!(p.contains(p.end));
        assert!(!p.contains(p.end + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_enum_round_trip_through_text() {
        assert_eq!("partner".parse::<PartyType>().unwrap(), PartyType::Partner);
        assert_eq!("refund_reversal".parse::<ReasonCode>().unwrap(), ReasonCode::RefundReversal);
        assert_eq!("processing".parse::<SettlementStatus>().unwrap(), SettlementStatus::Processing);
        assert!("vendor".parse::<PartyType>().is_err());
    }
}
