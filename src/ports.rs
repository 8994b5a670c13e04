//! Repository interfaces the settlement services run against.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Order, PartyType, ReasonCode, Settlement, SettlementItem, SettlementKey, SettlementPeriod,
    SettlementStatus,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                RepositoryError::Duplicate(db.message().to_string())
            }
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

/// Read access to orders owned by order management.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Loads an order with its lines in line order.
    async fn get_with_lines(&self, order_id: Uuid) -> RepositoryResult<Order>;
}

/// Filter for the read-side settlement listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettlementFilter {
    pub party_type: Option<PartyType>,
    pub party_id: Option<String>,
    pub status: Option<SettlementStatus>,
    pub period_start: Option<chrono::DateTime<chrono::Utc>>,
}

impl SettlementFilter {
    pub fn matches(&self, settlement: &Settlement) -> bool {
        self.party_type.map_or(true, |p| p == settlement.party_type)
            && self.party_id.as_ref().map_or(true, |p| p == &settlement.party_id)
            && self.status.map_or(true, |s| s == settlement.status)
            && self.period_start.map_or(true, |p| p == settlement.period_start)
    }
}

#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Opens an atomic unit of work. Dropping it without `commit` rolls back.
    async fn begin(&self) -> RepositoryResult<Box<dyn SettlementUnitOfWork>>;

    async fn find_items_for_order(
        &self,
        order_id: Uuid,
        reason_code: ReasonCode,
    ) -> RepositoryResult<Vec<SettlementItem>>;

    /// Pending settlements whose period matches `period` exactly.
    async fn find_pending_for_period(
        &self,
        period: &SettlementPeriod,
    ) -> RepositoryResult<Vec<Settlement>>;

    async fn get(&self, id: Uuid) -> RepositoryResult<Settlement>;

    async fn list(
        &self,
        filter: &SettlementFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Settlement>>;

    async fn items_for_settlement(
        &self,
        settlement_id: Uuid,
    ) -> RepositoryResult<Vec<SettlementItem>>;

    async fn health_check(&self) -> RepositoryResult<()>;
}

/// One read-modify-write over settlement rows. Every settlement returned by
/// `lock_or_create` or `lock` stays locked until commit or rollback, so
/// concurrent writers for the same party and period are serialized.
#[async_trait]
pub trait SettlementUnitOfWork: Send {
    /// Finds the settlement for `key`, creating a zeroed pending one if absent.
    async fn lock_or_create(&mut self, key: &SettlementKey) -> RepositoryResult<Settlement>;

    async fn lock(&mut self, id: Uuid) -> RepositoryResult<Settlement>;

    /// Settlement holding the party's item for this order and reason, if any.
    async fn find_settlement_for_order(
        &mut self,
        order_id: Uuid,
        party_type: PartyType,
        party_id: &str,
        reason_code: ReasonCode,
    ) -> RepositoryResult<Option<Uuid>>;

    /// Fails with `Duplicate` if an item for the same order line, party and
    /// reason already exists.
    async fn insert_items(&mut self, items: &[SettlementItem]) -> RepositoryResult<()>;

    async fn items(&mut self, settlement_id: Uuid) -> RepositoryResult<Vec<SettlementItem>>;

    async fn save(&mut self, settlement: &Settlement) -> RepositoryResult<Settlement>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
}

/// Hook for read-side caches keyed by party dashboards.
#[async_trait]
pub trait SettlementCacheInvalidator: Send + Sync {
    async fn settlements_changed(&self, settlements: &[Settlement]);
}
