//! Postgres implementations of the repository ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    Order, OrderLine, PartyType, ReasonCode, Settlement, SettlementItem, SettlementKey,
    SettlementPeriod, SettlementStatus,
};
use crate::ports::{
    OrderRepository, RepositoryError, RepositoryResult, SettlementFilter, SettlementRepository,
    SettlementUnitOfWork,
};

const SETTLEMENT_COLUMNS: &str = "id, party_type, party_id, period_start, period_end, \
    total_gross_amount, total_commission_amount, payable_amount, item_count, status, metadata, \
    created_at, updated_at, finalized_at";

const ITEM_COLUMNS: &str = "id, settlement_id, order_id, order_line_id, party_type, party_id, \
    gross_amount, commission_amount, net_amount, reason_code, product_name, quantity, created_at";

/// Postgres-backed order reader.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn get_with_lines(&self, order_id: Uuid) -> RepositoryResult<Order> {
        let order = sqlx::query_as::<_, OrderRow>(
            "SELECT id, order_date, status FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("order {}", order_id)))?;

        let lines = sqlx::query_as::<_, OrderLineRow>(
            r#"
            SELECT id, product_id, product_name, quantity, unit_price, total_price,
                   seller_id, seller_name, supplier_id, supplier_name,
                   base_price_snapshot, sale_price_snapshot,
                   commission_type, commission_rate, commission_amount, partner_id
            FROM order_lines
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Order {
            id: order.id,
            order_date: order.order_date,
            status: order.status,
            lines: lines.into_iter().map(OrderLineRow::into_domain).collect(),
        })
    }
}

/// Postgres-backed settlement store.
#[derive(Clone)]
pub struct PostgresSettlementRepository {
    pool: PgPool,
}

impl PostgresSettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementRepository for PostgresSettlementRepository {
    async fn begin(&self) -> RepositoryResult<Box<dyn SettlementUnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_items_for_order(
        &self,
        order_id: Uuid,
        reason_code: ReasonCode,
    ) -> RepositoryResult<Vec<SettlementItem>> {
        let rows = sqlx::query_as::<_, SettlementItemRow>(&format!(
            "SELECT {} FROM settlement_items WHERE order_id = $1 AND reason_code = $2 \
             ORDER BY created_at, id",
            ITEM_COLUMNS
        ))
        .bind(order_id)
        .bind(reason_code.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettlementItemRow::into_domain).collect()
    }

    async fn find_pending_for_period(
        &self,
        period: &SettlementPeriod,
    ) -> RepositoryResult<Vec<Settlement>> {
        let rows = sqlx::query_as::<_, SettlementRow>(&format!(
            r#"
            SELECT {} FROM settlements
            WHERE status = $1 AND period_start = $2 AND period_end = $3
            ORDER BY created_at ASC
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(SettlementStatus::Pending.as_str())
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettlementRow::into_domain).collect()
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Settlement> {
        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            "SELECT {} FROM settlements WHERE id = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("settlement {}", id)))?
            .into_domain()
    }

    async fn list(
        &self,
        filter: &SettlementFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Settlement>> {
        let rows = sqlx::query_as::<_, SettlementRow>(&format!(
            r#"
            SELECT {} FROM settlements
            WHERE ($1::text IS NULL OR party_type = $1)
              AND ($2::text IS NULL OR party_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR period_start = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(filter.party_type.map(|p| p.as_str()))
        .bind(filter.party_id.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.period_start)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettlementRow::into_domain).collect()
    }

    async fn items_for_settlement(
        &self,
        settlement_id: Uuid,
    ) -> RepositoryResult<Vec<SettlementItem>> {
        let rows = sqlx::query_as::<_, SettlementItemRow>(&format!(
            "SELECT {} FROM settlement_items WHERE settlement_id = $1 ORDER BY created_at, id",
            ITEM_COLUMNS
        ))
        .bind(settlement_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettlementItemRow::into_domain).collect()
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// One database transaction. Rows read through `lock_or_create` and `lock`
/// are held with `FOR UPDATE` until commit; dropping rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementUnitOfWork for PgUnitOfWork {
    async fn lock_or_create(&mut self, key: &SettlementKey) -> RepositoryResult<Settlement> {
        let draft = Settlement::pending(key);

        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, party_type, party_id, period_start, period_end,
                total_gross_amount, total_commission_amount, payable_amount, item_count,
                status, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 0, 0, 0, 0, $6, $7, $8, $8)
            ON CONFLICT (party_type, party_id, period_start, period_end) DO NOTHING
            "#,
        )
        .bind(draft.id)
        .bind(draft.party_type.as_str())
        .bind(&draft.party_id)
        .bind(draft.period_start)
        .bind(draft.period_end)
        .bind(draft.status.as_str())
        .bind(&draft.metadata)
        .bind(draft.created_at)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            r#"
            SELECT {} FROM settlements
            WHERE party_type = $1 AND party_id = $2 AND period_start = $3 AND period_end = $4
            FOR UPDATE
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(key.party_type.as_str())
        .bind(&key.party_id)
        .bind(key.period.start)
        .bind(key.period.end)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn lock(&mut self, id: Uuid) -> RepositoryResult<Settlement> {
        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            "SELECT {} FROM settlements WHERE id = $1 FOR UPDATE",
            SETTLEMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("settlement {}", id)))?
            .into_domain()
    }

    async fn find_settlement_for_order(
        &mut self,
        order_id: Uuid,
        party_type: PartyType,
        party_id: &str,
        reason_code: ReasonCode,
    ) -> RepositoryResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT settlement_id FROM settlement_items
            WHERE order_id = $1 AND party_type = $2 AND party_id = $3 AND reason_code = $4
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .bind(party_type.as_str())
        .bind(party_id)
        .bind(reason_code.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn insert_items(&mut self, items: &[SettlementItem]) -> RepositoryResult<()> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO settlement_items (
                    id, settlement_id, order_id, order_line_id, party_type, party_id,
                    gross_amount, commission_amount, net_amount, reason_code,
                    product_name, quantity, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(item.id)
            .bind(item.settlement_id)
            .bind(item.order_id)
            .bind(item.order_line_id)
            .bind(item.party_type.as_str())
            .bind(&item.party_id)
            .bind(&item.gross_amount)
            .bind(&item.commission_amount)
            .bind(&item.net_amount)
            .bind(item.reason_code.as_str())
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn items(&mut self, settlement_id: Uuid) -> RepositoryResult<Vec<SettlementItem>> {
        let rows = sqlx::query_as::<_, SettlementItemRow>(&format!(
            "SELECT {} FROM settlement_items WHERE settlement_id = $1 ORDER BY created_at, id",
            ITEM_COLUMNS
        ))
        .bind(settlement_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(SettlementItemRow::into_domain).collect()
    }

    async fn save(&mut self, settlement: &Settlement) -> RepositoryResult<Settlement> {
        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            r#"
            UPDATE settlements SET
                total_gross_amount = $2,
                total_commission_amount = $3,
                payable_amount = $4,
                item_count = $5,
                status = $6,
                metadata = $7,
                updated_at = $8,
                finalized_at = $9
            WHERE id = $1
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(settlement.id)
        .bind(&settlement.total_gross_amount)
        .bind(&settlement.total_commission_amount)
        .bind(&settlement.payable_amount)
        .bind(settlement.item_count)
        .bind(settlement.status.as_str())
        .bind(&settlement.metadata)
        .bind(settlement.updated_at)
        .bind(settlement.finalized_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("settlement {}", settlement.id)))?
            .into_domain()
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> RepositoryResult<T> {
    value.parse::<T>().map_err(RepositoryError::Database)
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct SettlementRow {
    id: Uuid,
    party_type: String,
    party_id: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    total_gross_amount: BigDecimal,
    total_commission_amount: BigDecimal,
    payable_amount: BigDecimal,
    item_count: i32,
    status: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
}

impl SettlementRow {
    fn into_domain(self) -> RepositoryResult<Settlement> {
        Ok(Settlement {
            id: self.id,
            party_type: parse_column(&self.party_type)?,
            party_id: self.party_id,
            period_start: self.period_start,
            period_end: self.period_end,
            total_gross_amount: self.total_gross_amount,
            total_commission_amount: self.total_commission_amount,
            payable_amount: self.payable_amount,
            item_count: self.item_count,
            status: parse_column(&self.status)?,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
            finalized_at: self.finalized_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementItemRow {
    id: Uuid,
    settlement_id: Uuid,
    order_id: Uuid,
    order_line_id: Uuid,
    party_type: String,
    party_id: String,
    gross_amount: BigDecimal,
    commission_amount: BigDecimal,
    net_amount: BigDecimal,
    reason_code: String,
    product_name: Option<String>,
    quantity: i32,
    created_at: DateTime<Utc>,
}

impl SettlementItemRow {
    fn into_domain(self) -> RepositoryResult<SettlementItem> {
        Ok(SettlementItem {
            id: self.id,
            settlement_id: self.settlement_id,
            order_id: self.order_id,
            order_line_id: self.order_line_id,
            party_type: parse_column(&self.party_type)?,
            party_id: self.party_id,
            gross_amount: self.gross_amount,
            commission_amount: self.commission_amount,
            net_amount: self.net_amount,
            reason_code: parse_column(&self.reason_code)?,
            product_name: self.product_name,
            quantity: self.quantity,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_date: DateTime<Utc>,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderLineRow {
    id: Uuid,
    product_id: String,
    product_name: String,
    quantity: i32,
    unit_price: BigDecimal,
    total_price: BigDecimal,
    seller_id: String,
    seller_name: Option<String>,
    supplier_id: String,
    supplier_name: Option<String>,
    base_price_snapshot: Option<BigDecimal>,
    sale_price_snapshot: Option<BigDecimal>,
    commission_type: Option<String>,
    commission_rate: Option<BigDecimal>,
    commission_amount: BigDecimal,
    partner_id: Option<String>,
}

impl OrderLineRow {
    fn into_domain(self) -> OrderLine {
        OrderLine {
            id: self.id,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_price: self.total_price,
            seller_id: self.seller_id,
            seller_name: self.seller_name,
            supplier_id: self.supplier_id,
            supplier_name: self.supplier_name,
            base_price_snapshot: self.base_price_snapshot,
            sale_price_snapshot: self.sale_price_snapshot,
            commission_type: self.commission_type,
            commission_rate: self.commission_rate,
            commission_amount: self.commission_amount,
            partner_id: self.partner_id,
        }
    }
}
