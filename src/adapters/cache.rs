//! Dashboard cache invalidation hooks.

use async_trait::async_trait;

use crate::domain::Settlement;
use crate::ports::SettlementCacheInvalidator;

/// Default hook: no read-side cache to invalidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheInvalidator;

#[async_trait]
impl SettlementCacheInvalidator for NoopCacheInvalidator {
    async fn settlements_changed(&self, _settlements: &[Settlement]) {}
}

/// Emits one debug event per affected party dashboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCacheInvalidator;

#[async_trait]
impl SettlementCacheInvalidator for LoggingCacheInvalidator {
    async fn settlements_changed(&self, settlements: &[Settlement]) {
        for settlement in settlements {
            tracing::debug!(
                party_type = %settlement.party_type,
                party_id = %settlement.party_id,
                settlement_id = %settlement.id,
                status = %settlement.status,
                "Invalidating party dashboard cache"
            );
        }
    }
}
