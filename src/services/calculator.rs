//! Settlement calculator.
//! Pure derivation of per-party settlement item inputs from order lines.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::domain::{
    CommissionRuleSet, Order, OrderLine, PartyType, ReasonCode, SettlementItem,
    SettlementItemInput,
};

pub const DEFAULT_PLATFORM_PARTY_ID: &str = "platform";

/// How often each configured commission rule was applied, keyed by rule id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleDiagnostics {
    pub rule_hits: BTreeMap<String, usize>,
    /// Tiered rules only: lines for which a tier matched.
    pub tiers_applied: BTreeMap<String, usize>,
}

impl RuleDiagnostics {
    fn record_hit(&mut self, rule_id: &str) {
        *self.rule_hits.entry(rule_id.to_string()).or_default() += 1;
    }

    fn record_tier(&mut self, rule_id: &str) {
        *self.tiers_applied.entry(rule_id.to_string()).or_default() += 1;
    }
}

/// Derives one party's share of an order line.
///
/// A strategy may emit several inputs, e.g. a partner share together with
/// the platform item that funds it. Inputs for the same party on the same
/// line are merged by the calculator.
pub trait PartyShareStrategy: Send + Sync {
    fn party_type(&self) -> PartyType;

    fn derive(
        &self,
        order: &Order,
        line: &OrderLine,
        diagnostics: &mut RuleDiagnostics,
    ) -> Vec<SettlementItemInput>;
}

fn share(
    party_type: PartyType,
    party_id: &str,
    order: &Order,
    line: &OrderLine,
    gross: BigDecimal,
    commission: BigDecimal,
) -> SettlementItemInput {
    SettlementItemInput::new(
        party_type,
        party_id,
        order.id,
        line.id,
        gross,
        commission,
        ReasonCode::OrderCompleted,
    )
    .with_product(line.product_name.clone(), line.quantity)
}

/// Seller receives the line total minus the commission taken by the platform.
pub struct SellerShare;

impl PartyShareStrategy for SellerShare {
    fn party_type(&self) -> PartyType {
        PartyType::Seller
    }

    fn derive(
        &self,
        order: &Order,
        line: &OrderLine,
        _diagnostics: &mut RuleDiagnostics,
    ) -> Vec<SettlementItemInput> {
        vec![share(
            PartyType::Seller,
            &line.seller_id,
            order,
            line,
            line.total_price.clone(),
            line.commission_amount.clone(),
        )]
    }
}

/// Supplier receives its cost basis: base price snapshot times quantity.
pub struct SupplierShare;

impl PartyShareStrategy for SupplierShare {
    fn party_type(&self) -> PartyType {
        PartyType::Supplier
    }

    fn derive(
        &self,
        order: &Order,
        line: &OrderLine,
        _diagnostics: &mut RuleDiagnostics,
    ) -> Vec<SettlementItemInput> {
        vec![share(
            PartyType::Supplier,
            &line.supplier_id,
            order,
            line,
            line.base_cost(),
            BigDecimal::from(0),
        )]
    }
}

/// Platform receives the commission collected from the seller.
pub struct PlatformShare {
    platform_id: String,
}

impl PlatformShare {
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
        }
    }
}

impl PartyShareStrategy for PlatformShare {
    fn party_type(&self) -> PartyType {
        PartyType::Platform
    }

    fn derive(
        &self,
        order: &Order,
        line: &OrderLine,
        _diagnostics: &mut RuleDiagnostics,
    ) -> Vec<SettlementItemInput> {
        vec![share(
            PartyType::Platform,
            &self.platform_id,
            order,
            line,
            line.commission_amount.clone(),
            BigDecimal::from(0),
        )]
    }
}

/// Referral partner share, funded out of the platform's commission.
///
/// The rule is looked up per line by product. The share is capped at the
/// line commission so the platform never goes negative on a single line.
pub struct PartnerReferralShare {
    rules: CommissionRuleSet,
    platform_id: String,
}

impl PartnerReferralShare {
    pub fn new(rules: CommissionRuleSet, platform_id: impl Into<String>) -> Self {
        Self {
            rules,
            platform_id: platform_id.into(),
        }
    }
}

impl PartyShareStrategy for PartnerReferralShare {
    fn party_type(&self) -> PartyType {
        PartyType::Partner
    }

    fn derive(
        &self,
        order: &Order,
        line: &OrderLine,
        diagnostics: &mut RuleDiagnostics,
    ) -> Vec<SettlementItemInput> {
        let Some(partner_id) = line.partner_id.as_deref() else {
            return Vec::new();
        };
        let Some(scoped) = self.rules.find_applicable(PartyType::Partner, &line.product_id) else {
            return Vec::new();
        };
        diagnostics.record_hit(&scoped.id);
        if scoped.rule.matching_tier(line).is_some() {
            diagnostics.record_tier(&scoped.id);
        }

        let mut amount = scoped.rule.share_of(line);
        if amount > line.commission_amount {
            amount = line.commission_amount.clone();
        }
        if amount <= BigDecimal::from(0) {
            return Vec::new();
        }

        let zero = BigDecimal::from(0);
        vec![
            share(PartyType::Partner, partner_id, order, line, amount.clone(), zero.clone()),
            share(
                PartyType::Platform,
                &self.platform_id,
                order,
                line,
                -amount,
                zero,
            ),
        ]
    }
}

/// Stateless settlement calculator, polymorphic over party-share strategies.
pub struct Calculator {
    strategies: Vec<Box<dyn PartyShareStrategy>>,
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new(DEFAULT_PLATFORM_PARTY_ID)
    }
}

impl Calculator {
    /// Seller, supplier and platform shares.
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            strategies: vec![
                Box::new(SellerShare),
                Box::new(SupplierShare),
                Box::new(PlatformShare::new(platform_id)),
            ],
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn PartyShareStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_partner(self, rules: CommissionRuleSet, platform_id: impl Into<String>) -> Self {
        self.with_strategy(Box::new(PartnerReferralShare::new(rules, platform_id)))
    }

    pub fn party_types(&self) -> Vec<PartyType> {
        self.strategies.iter().map(|s| s.party_type()).collect()
    }

    /// Inputs for every line, in line order, at most one per party per line.
    /// Identical input always yields identical output.
    pub fn calculate_from_order_items(
        &self,
        order: &Order,
        lines: &[OrderLine],
    ) -> Vec<SettlementItemInput> {
        self.calculate_with_diagnostics(order, lines).0
    }

    /// Same inputs as `calculate_from_order_items`, plus per-rule counters.
    pub fn calculate_with_diagnostics(
        &self,
        order: &Order,
        lines: &[OrderLine],
    ) -> (Vec<SettlementItemInput>, RuleDiagnostics) {
        let mut diagnostics = RuleDiagnostics::default();
        let mut items = Vec::new();
        for line in lines {
            let mut derived = Vec::new();
            for strategy in &self.strategies {
                derived.extend(strategy.derive(order, line, &mut diagnostics));
            }
            items.extend(merge_by_party(derived));
        }
        (items, diagnostics)
    }

    /// One negated `refund_reversal` input per original `order_completed`
    /// item of this order. Empty originals mean there is nothing to reverse.
    pub fn calculate_reversal_for_order(
        &self,
        order: &Order,
        original_items: &[SettlementItem],
    ) -> Vec<SettlementItemInput> {
        original_items
            .iter()
            .filter(|item| {
                item.order_id == order.id && item.reason_code == ReasonCode::OrderCompleted
            })
            .map(|item| item.to_input().negated(ReasonCode::RefundReversal))
            .collect()
    }
}

fn merge_by_party(items: Vec<SettlementItemInput>) -> Vec<SettlementItemInput> {
    let mut merged: Vec<SettlementItemInput> = Vec::with_capacity(items.len());
    for item in items {
        match merged
            .iter_mut()
            .find(|m| m.party_type == item.party_type && m.party_id == item.party_id)
        {
            Some(existing) => existing.absorb(&item),
            None => merged.push(item),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommissionRule, CommissionTier, RuleScope, ScopedCommissionRule};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn line(quantity: i32, total: &str, base: &str, commission: &str) -> OrderLine {
        OrderLine {
            id: Uuid::new_v4(),
            product_id: "sku-1".to_string(),
            product_name: "Widget".to_string(),
            quantity,
            unit_price: dec(total) / BigDecimal::from(quantity),
            total_price: dec(total),
            seller_id: "seller-1".to_string(),
            seller_name: Some("Acme Store".to_string()),
            supplier_id: "supplier-1".to_string(),
            supplier_name: Some("Acme Supply".to_string()),
            base_price_snapshot: Some(dec(base)),
            sale_price_snapshot: Some(dec(total) / BigDecimal::from(quantity)),
            commission_type: Some("rate".to_string()),
            commission_rate: Some(dec("20")),
            commission_amount: dec(commission),
            partner_id: None,
        }
    }

    fn order(lines: Vec<OrderLine>) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_date: Utc::now(),
            status: "delivered".to_string(),
            lines,
        }
    }

    fn percentage(rate: &str) -> CommissionRuleSet {
        CommissionRuleSet::single(CommissionRule::Percentage { rate: dec(rate) })
    }

    fn by_party(items: &[SettlementItemInput], party: PartyType) -> &SettlementItemInput {
        items.iter().find(|i| i.party_type == party).unwrap()
    }

    #[test]
    fn test_three_shares_per_line() {
        let order = order(vec![line(2, "200", "70", "40")]);
        let items = Calculator::default().calculate_from_order_items(&order, &order.lines);

        assert_eq!(items.len(), 3);

        let seller = by_party(&items, PartyType::Seller);
        assert_eq!(seller.party_id, "seller-1");
        assert_eq!(seller.gross_amount, dec("200"));
        assert_eq!(seller.commission_amount, dec("40"));
        assert_eq!(seller.net_amount, dec("160"));

        let supplier = by_party(&items, PartyType::Supplier);
        assert_eq!(supplier.party_id, "supplier-1");
        assert_eq!(supplier.gross_amount, dec("140"));
        assert_eq!(supplier.commission_amount, dec("0"));
        assert_eq!(supplier.net_amount, dec("140"));

        let platform = by_party(&items, PartyType::Platform);
        assert_eq!(platform.party_id, DEFAULT_PLATFORM_PARTY_ID);
        assert_eq!(platform.gross_amount, dec("40"));
        assert_eq!(platform.net_amount, dec("40"));

        assert!(items.iter().all(|i| i.reason_code == ReasonCode::OrderCompleted));
        assert!(items.iter().all(|i| i.order_line_id == order.lines[0].id));
    }

    #[test]
    fn test_net_equals_gross_minus_commission_for_every_input() {
        let order = order(vec![
            line(2, "200", "70", "40"),
            line(1, "99.99", "45.10", "12.35"),
        ]);
        for item in Calculator::default().calculate_from_order_items(&order, &order.lines) {
            assert_eq!(item.net_amount, &item.gross_amount - &item.commission_amount);
        }
    }

    #[test]
    fn test_shares_reconstruct_line_total() {
        // The supplier cost basis is paid on top of the line split.
        let order = order(vec![line(2, "200", "70", "40")]);
        let items = Calculator::default().calculate_from_order_items(&order, &order.lines);

        let seller = by_party(&items, PartyType::Seller);
        let platform = by_party(&items, PartyType::Platform);
        assert_eq!(&seller.net_amount + &platform.gross_amount, order.lines[0].total_price);
    }

    #[test]
    fn test_calculation_is_deterministic() {
        let order = order(vec![line(2, "200", "70", "40"), line(3, "30", "6", "3")]);
        let calculator = Calculator::default();
        assert_eq!(
            calculator.calculate_from_order_items(&order, &order.lines),
            calculator.calculate_from_order_items(&order, &order.lines)
        );
    }

    #[test]
    fn test_empty_lines_yield_no_inputs() {
        let order = order(Vec::new());
        let items = Calculator::default().calculate_from_order_items(&order, &order.lines);
        assert!(items.is_empty());
    }

    #[test]
    fn test_reversal_negates_and_sums_to_zero() {
        let order = order(vec![line(2, "200", "70", "40"), line(1, "50", "20", "10")]);
        let calculator = Calculator::default();
        let settlement_id = Uuid::new_v4();
        let originals: Vec<SettlementItem> = calculator
            .calculate_from_order_items(&order, &order.lines)
            .iter()
            .map(|i| SettlementItem::from_input(settlement_id, i, Utc::now()))
            .collect();

        let reversals = calculator.calculate_reversal_for_order(&order, &originals);
        assert_eq!(reversals.len(), originals.len());
        assert!(reversals.iter().all(|r| r.reason_code == ReasonCode::RefundReversal));

        type Sums = (BigDecimal, BigDecimal, BigDecimal);
        let mut sums: HashMap<(PartyType, String), Sums> = HashMap::new();
        let all = originals.iter().map(|o| o.to_input()).chain(reversals);
        for item in all {
            let entry = sums
                .entry(item.party_key())
                .or_insert_with(|| (dec("0"), dec("0"), dec("0")));
            entry.0 = &entry.0 + &item.gross_amount;
            entry.1 = &entry.1 + &item.commission_amount;
            entry.2 = &entry.2 + &item.net_amount;
        }
        for (gross, commission, net) in sums.values() {
            assert_eq!(gross, &dec("0"));
            assert_eq!(commission, &dec("0"));
            assert_eq!(net, &dec("0"));
        }
    }

    #[test]
    fn test_reversal_of_nothing_is_empty() {
        let order = order(vec![line(2, "200", "70", "40")]);
        let reversals = Calculator::default().calculate_reversal_for_order(&order, &[]);
        assert!(reversals.is_empty());
    }

    #[test]
    fn test_reversal_ignores_prior_reversals() {
        let order = order(vec![line(2, "200", "70", "40")]);
        let calculator = Calculator::default();
        let reversed: Vec<SettlementItem> = calculator
            .calculate_from_order_items(&order, &order.lines)
            .iter()
            .map(|i| i.negated(ReasonCode::RefundReversal))
            .map(|i| SettlementItem::from_input(Uuid::new_v4(), &i, Utc::now()))
            .collect();

        assert!(calculator.calculate_reversal_for_order(&order, &reversed).is_empty());
    }

    #[test]
    fn test_partner_share_is_funded_by_platform() {
        let mut referred = line(2, "200", "70", "40");
        referred.partner_id = Some("partner-7".to_string());
        let order = order(vec![referred]);

        let calculator = Calculator::default()
            .with_partner(percentage("5"), DEFAULT_PLATFORM_PARTY_ID);
        let items = calculator.calculate_from_order_items(&order, &order.lines);

        assert_eq!(items.len(), 4);
        let partner = by_party(&items, PartyType::Partner);
        assert_eq!(partner.party_id, "partner-7");
        assert_eq!(partner.net_amount, dec("10"));

        let platform = by_party(&items, PartyType::Platform);
        assert_eq!(platform.gross_amount, dec("30"));
        assert_eq!(platform.net_amount, dec("30"));

        let seller = by_party(&items, PartyType::Seller);
        let supplier = by_party(&items, PartyType::Supplier);
        assert_eq!(
            &seller.net_amount + &platform.gross_amount + &partner.gross_amount,
            dec("200")
        );
        assert_eq!(supplier.gross_amount, dec("140"));
    }

    #[test]
    fn test_partner_share_capped_at_commission() {
        let mut referred = line(1, "100", "50", "5");
        referred.partner_id = Some("partner-7".to_string());
        let order = order(vec![referred]);

        let items = Calculator::default()
            .with_partner(
                CommissionRuleSet::single(CommissionRule::Fixed { amount: dec("8") }),
                DEFAULT_PLATFORM_PARTY_ID,
            )
            .calculate_from_order_items(&order, &order.lines);

        assert_eq!(by_party(&items, PartyType::Partner).gross_amount, dec("5"));
        assert_eq!(by_party(&items, PartyType::Platform).gross_amount, dec("0"));
    }

    #[test]
    fn test_partner_strategy_skips_lines_without_partner() {
        let order = order(vec![line(2, "200", "70", "40")]);
        let calculator = Calculator::default()
            .with_partner(percentage("5"), DEFAULT_PLATFORM_PARTY_ID);

        let items = calculator.calculate_from_order_items(&order, &order.lines);
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.party_type != PartyType::Partner));
        assert_eq!(
            calculator.party_types(),
            vec![PartyType::Seller, PartyType::Supplier, PartyType::Platform, PartyType::Partner]
        );
    }

    fn referred(product_id: &str, total: &str, commission: &str) -> OrderLine {
        let mut referred = line(1, total, "10", commission);
        referred.product_id = product_id.to_string();
        referred.partner_id = Some("partner-7".to_string());
        referred
    }

    #[test]
    fn test_partner_rule_scoped_by_product() {
        let rules = CommissionRuleSet::new(vec![
            ScopedCommissionRule {
                id: "default".to_string(),
                applies_to: RuleScope::default(),
                rule: CommissionRule::Percentage { rate: dec("5") },
            },
            ScopedCommissionRule {
                id: "books".to_string(),
                applies_to: RuleScope {
                    party_type: Some(PartyType::Partner),
                    product_ids: vec!["sku-9".to_string()],
                },
                rule: CommissionRule::Percentage { rate: dec("10") },
            },
        ]);
        let order = order(vec![referred("sku-9", "100", "30"), referred("sku-1", "100", "30")]);

        let (items, diagnostics) = Calculator::default()
            .with_partner(rules, DEFAULT_PLATFORM_PARTY_ID)
            .calculate_with_diagnostics(&order, &order.lines);

        let partner: Vec<_> = items
            .iter()
            .filter(|i| i.party_type == PartyType::Partner)
            .collect();
        assert_eq!(partner[0].gross_amount, dec("10"));
        assert_eq!(partner[1].gross_amount, dec("5"));
        assert_eq!(diagnostics.rule_hits.get("books"), Some(&1));
        assert_eq!(diagnostics.rule_hits.get("default"), Some(&1));
        assert!(diagnostics.tiers_applied.is_empty());
    }

    #[test]
    fn test_diagnostics_count_applied_tiers() {
        let rules = CommissionRuleSet::single(CommissionRule::Tiered {
            tiers: vec![CommissionTier {
                min_amount: dec("100"),
                max_amount: None,
                rate: dec("4"),
            }],
        });
        let order = order(vec![
            referred("sku-1", "150", "30"),
            referred("sku-1", "250", "50"),
            referred("sku-1", "50", "10"),
        ]);

        let (items, diagnostics) = Calculator::default()
            .with_partner(rules, DEFAULT_PLATFORM_PARTY_ID)
            .calculate_with_diagnostics(&order, &order.lines);

        // the untiered line still hits the rule but earns nothing
        assert_eq!(diagnostics.rule_hits.get("default"), Some(&3));
        assert_eq!(diagnostics.tiers_applied.get("default"), Some(&2));
        let partner_items = items
            .iter()
            .filter(|i| i.party_type == PartyType::Partner)
            .count();
        assert_eq!(partner_items, 2);
    }

    #[test]
    fn test_no_applicable_rule_means_no_partner_share() {
        let rules = CommissionRuleSet::new(vec![ScopedCommissionRule {
            id: "sellers".to_string(),
            applies_to: RuleScope {
                party_type: Some(PartyType::Seller),
                product_ids: Vec::new(),
            },
            rule: CommissionRule::Percentage { rate: dec("5") },
        }]);
        let order = order(vec![referred("sku-1", "100", "30")]);

        let (items, diagnostics) = Calculator::default()
            .with_partner(rules, DEFAULT_PLATFORM_PARTY_ID)
            .calculate_with_diagnostics(&order, &order.lines);

        assert_eq!(items.len(), 3);
        assert!(diagnostics.rule_hits.is_empty());
    }
}
