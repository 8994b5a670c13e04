//! Referral commission rules.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::order::OrderLine;
use super::settlement::PartyType;

/// How a referral partner's share of a line is derived.
///
/// Configured as JSON, e.g. `{"type":"percentage","rate":"5"}` or
/// `{"type":"tiered","tiers":[{"min_amount":"0","max_amount":"100","rate":"2"}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionRule {
    /// Percent of the line total.
    Percentage { rate: BigDecimal },
    /// Fixed amount per unit.
    Fixed { amount: BigDecimal },
    /// Percent of the line total, rate picked by the first matching tier.
    Tiered { tiers: Vec<CommissionTier> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_amount: BigDecimal,
    /// Exclusive upper bound; `None` means unbounded.
    pub max_amount: Option<BigDecimal>,
    pub rate: BigDecimal,
}

impl CommissionTier {
    fn matches(&self, amount: &BigDecimal) -> bool {
        let above_min = amount >= &self.min_amount;
        let below_max = self.max_amount.as_ref().map_or(true, |max| amount < max);
        above_min && below_max
    }
}

impl CommissionRule {
    /// Share owed for `line`, rounded to cents. Zero when no tier matches.
    pub fn share_of(&self, line: &OrderLine) -> BigDecimal {
        let share = match self {
            CommissionRule::Percentage { rate } => percent_of(&line.total_price, rate),
            CommissionRule::Fixed { amount } => amount * BigDecimal::from(line.quantity),
            CommissionRule::Tiered { .. } => self
                .matching_tier(line)
                .map(|tier| percent_of(&line.total_price, &tier.rate))
                .unwrap_or_else(|| BigDecimal::from(0)),
        };
        share.round(2)
    }

    /// Tier applied to `line`; always `None` for untiered rules.
    pub fn matching_tier(&self, line: &OrderLine) -> Option<&CommissionTier> {
        match self {
            CommissionRule::Tiered { tiers } => {
                tiers.iter().find(|tier| tier.matches(&line.total_price))
            }
            _ => None,
        }
    }
}

/// Restricts a rule to a party type and/or a set of products.
/// An empty scope applies everywhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default)]
    pub party_type: Option<PartyType>,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

impl RuleScope {
    pub fn is_unscoped(&self) -> bool {
        self.party_type.is_none() && self.product_ids.is_empty()
    }

    fn matches(&self, party_type: PartyType, product_id: &str) -> bool {
        let party_ok = self.party_type.map_or(true, |p| p == party_type);
        let product_ok =
            self.product_ids.is_empty() || self.product_ids.iter().any(|id| id == product_id);
        party_ok && product_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedCommissionRule {
    pub id: String,
    #[serde(default)]
    pub applies_to: RuleScope,
    pub rule: CommissionRule,
}

/// Ordered list of commission rules.
///
/// Configured as a JSON array of `{"id", "applies_to", "rule"}` objects,
/// e.g. `[{"id":"default","rule":{"type":"percentage","rate":"5"}}]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommissionRuleSet {
    rules: Vec<ScopedCommissionRule>,
}

impl CommissionRuleSet {
    pub fn new(rules: Vec<ScopedCommissionRule>) -> Self {
        Self { rules }
    }

    /// A set holding `rule` as its only, unscoped, rule.
    pub fn single(rule: CommissionRule) -> Self {
        Self::new(vec![ScopedCommissionRule {
            id: "default".to_string(),
            applies_to: RuleScope::default(),
            rule,
        }])
    }

    pub fn rules(&self) -> &[ScopedCommissionRule] {
        &self.rules
    }

    /// First scoped rule whose scope covers the party and product, in
    /// configured order. Falls back to the first unscoped rule.
    pub fn find_applicable(
        &self,
        party_type: PartyType,
        product_id: &str,
    ) -> Option<&ScopedCommissionRule> {
        self.rules
            .iter()
            .filter(|r| !r.applies_to.is_unscoped())
            .find(|r| r.applies_to.matches(party_type, product_id))
            .or_else(|| self.rules.iter().find(|r| r.applies_to.is_unscoped()))
    }
}

fn percent_of(amount: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
    amount * rate / BigDecimal::from(100)
}
