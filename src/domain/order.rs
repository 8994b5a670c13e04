//! Order read model.
//! Owned by order management; the settlement engine only reads it.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completed (or refunded) order with its lines in line order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_date: DateTime<Utc>,
    pub status: String,
    pub lines: Vec<OrderLine>,
}

/// One priced, commission-annotated order line.
///
/// `base_price_snapshot` and `sale_price_snapshot` are frozen at order time,
/// so later catalog price changes never alter settlement math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_price: BigDecimal,
    pub seller_id: String,
    pub seller_name: Option<String>,
    pub supplier_id: String,
    pub supplier_name: Option<String>,
    pub base_price_snapshot: Option<BigDecimal>,
    pub sale_price_snapshot: Option<BigDecimal>,
    pub commission_type: Option<String>,
    pub commission_rate: Option<BigDecimal>,
    /// Absolute commission already computed by the order pipeline.
    pub commission_amount: BigDecimal,
    /// Referral partner credited for this line, if any.
    pub partner_id: Option<String>,
}

impl OrderLine {
    /// Supplier cost basis for the whole line. A missing snapshot counts as zero.
    pub fn base_cost(&self) -> BigDecimal {
        match &self.base_price_snapshot {
            Some(base) => base * BigDecimal::from(self.quantity),
            None => BigDecimal::from(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn line(base: Option<&str>) -> OrderLine {
        OrderLine {
            id: Uuid::new_v4(),
            product_id: "sku-1".to_string(),
            product_name: "Widget".to_string(),
            quantity: 3,
            unit_price: BigDecimal::from(50),
            total_price: BigDecimal::from(150),
            seller_id: "seller-1".to_string(),
            seller_name: None,
            supplier_id: "supplier-1".to_string(),
            supplier_name: None,
            base_price_snapshot: base.map(|b| BigDecimal::from_str(b).unwrap()),
            sale_price_snapshot: None,
            commission_type: None,
            commission_rate: None,
            commission_amount: BigDecimal::from(15),
            partner_id: None,
        }
    }

    #[test]
    fn test_base_cost_multiplies_snapshot_by_quantity() {
        assert_eq!(line(Some("30.50")).base_cost(), BigDecimal::from_str("91.50").unwrap());
    }

    #[test]
    fn test_base_cost_without_snapshot_is_zero() {
        assert_eq!(line(None).base_cost(), BigDecimal::from(0));
    }
}
