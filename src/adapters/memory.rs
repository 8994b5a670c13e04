//! In-memory implementations of the repository ports.
//!
//! Suitable for tests and local runs. A unit of work holds an exclusive lock
//! on the whole store and stages its writes on a copy, so concurrent units
//! are serialized and an uncommitted unit leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::domain::{
    Order, PartyType, ReasonCode, Settlement, SettlementItem, SettlementKey, SettlementPeriod,
    SettlementStatus,
};
use crate::ports::{
    OrderRepository, RepositoryError, RepositoryResult, SettlementFilter, SettlementRepository,
    SettlementUnitOfWork,
};

#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an order (test setup).
    pub async fn add(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get_with_lines(&self, order_id: Uuid) -> RepositoryResult<Order> {
        self.orders
            .read()
            .await
            .get(&order_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", order_id)))
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    settlements: HashMap<Uuid, Settlement>,
    items: Vec<SettlementItem>,
}

impl MemoryState {
    fn settlement(&self, id: Uuid) -> RepositoryResult<Settlement> {
        self.settlements
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("settlement {}", id)))
    }

    fn items_of(&self, settlement_id: Uuid) -> Vec<SettlementItem> {
        self.items
            .iter()
            .filter(|i| i.settlement_id == settlement_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySettlementRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemorySettlementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_settlements(&self) -> Vec<Settlement> {
        let state = self.state.lock().await;
        let mut all: Vec<Settlement> = state.settlements.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }
}

#[async_trait]
impl SettlementRepository for InMemorySettlementRepository {
    async fn begin(&self) -> RepositoryResult<Box<dyn SettlementUnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, staged }))
    }

    async fn find_items_for_order(
        &self,
        order_id: Uuid,
        reason_code: ReasonCode,
    ) -> RepositoryResult<Vec<SettlementItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|i| i.order_id == order_id && i.reason_code == reason_code)
            .cloned()
            .collect())
    }

    async fn find_pending_for_period(
        &self,
        period: &SettlementPeriod,
    ) -> RepositoryResult<Vec<Settlement>> {
        let state = self.state.lock().await;
        let mut pending: Vec<Settlement> = state
            .settlements
            .values()
            .filter(|s| s.status == SettlementStatus::Pending && s.period() == *period)
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.created_at);
        Ok(pending)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Settlement> {
        self.state.lock().await.settlement(id)
    }

    async fn list(
        &self,
        filter: &SettlementFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Settlement>> {
        let state = self.state.lock().await;
        let mut matching: Vec<Settlement> = state
            .settlements
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn items_for_settlement(
        &self,
        settlement_id: Uuid,
    ) -> RepositoryResult<Vec<SettlementItem>> {
        Ok(self.state.lock().await.items_of(settlement_id))
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl SettlementUnitOfWork for InMemoryUnitOfWork {
    async fn lock_or_create(&mut self, key: &SettlementKey) -> RepositoryResult<Settlement> {
        if let Some(existing) = self.staged.settlements.values().find(|s| s.key() == *key) {
            return Ok(existing.clone());
        }
        let created = Settlement::pending(key);
        self.staged.settlements.insert(created.id, created.clone());
        Ok(created)
    }

    async fn lock(&mut self, id: Uuid) -> RepositoryResult<Settlement> {
        self.staged.settlement(id)
    }

    async fn find_settlement_for_order(
        &mut self,
        order_id: Uuid,
        party_type: PartyType,
        party_id: &str,
        reason_code: ReasonCode,
    ) -> RepositoryResult<Option<Uuid>> {
        Ok(self
            .staged
            .items
            .iter()
            .find(|i| {
                i.order_id == order_id
                    && i.party_type == party_type
                    && i.party_id == party_id
                    && i.reason_code == reason_code
            })
            .map(|i| i.settlement_id))
    }

    async fn insert_items(&mut self, items: &[SettlementItem]) -> RepositoryResult<()> {
        for item in items {
            let duplicate = self.staged.items.iter().any(|existing| {
                existing.order_line_id == item.order_line_id
                    && existing.party_type == item.party_type
                    && existing.party_id == item.party_id
                    && existing.reason_code == item.reason_code
            });
            if duplicate {
                return Err(RepositoryError::Duplicate(format!(
                    "settlement item for line {} ({}:{}, {})",
                    item.order_line_id, item.party_type, item.party_id, item.reason_code
                )));
            }
            if !self.staged.settlements.contains_key(&item.settlement_id) {
                return Err(RepositoryError::NotFound(format!(
                    "settlement {}",
                    item.settlement_id
                )));
            }
            self.staged.items.push(item.clone());
        }
        Ok(())
    }

    async fn items(&mut self, settlement_id: Uuid) -> RepositoryResult<Vec<SettlementItem>> {
        Ok(self.staged.items_of(settlement_id))
    }

    async fn save(&mut self, settlement: &Settlement) -> RepositoryResult<Settlement> {
        if !self.staged.settlements.contains_key(&settlement.id) {
            return Err(RepositoryError::NotFound(format!("settlement {}", settlement.id)));
        }
        self.staged.settlements.insert(settlement.id, settlement.clone());
        Ok(settlement.clone())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let InMemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
