//! Implementations of the repository ports and hooks.

pub mod cache;
pub mod memory;
pub mod postgres;

pub use cache::{LoggingCacheInvalidator, NoopCacheInvalidator};
pub use memory::{InMemoryOrderRepository, InMemorySettlementRepository};
pub use postgres::{PostgresOrderRepository, PostgresSettlementRepository};
