//! Abstract persistence plus two implementations.
//!
//! The core treats storage as an abstract data service: a `DataService`
//! dependency passed into the Router and Pool Manager rather than a global
//! client. Singletons are fine at the process boundary, never referenced
//! from inside an algorithm.

mod memory;
mod sqlite;

pub use memory::InMemoryDataService;
pub use sqlite::SqliteDataService;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Account, AccountId, AccountStatus, Group, GroupId, Money, ServiceType, UsageRecord};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A single append-only health-check history row, distinct from the Pool
/// Manager's live `HealthStatus` cache entry.
#[derive(Debug, Clone)]
pub struct HealthCheckHistoryRow {
    pub account_id: AccountId,
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Incremental deltas applied atomically after a successful provider call.
/// Keeping this as one call, rather than three separate read-modify-write
/// round trips, is what makes atomic increments achievable against a real
/// backend instead of racing lost updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountUsageDelta {
    pub requests: u64,
    pub tokens: u64,
    pub cost: Money,
}

#[async_trait]
pub trait DataService: Send + Sync {
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, DataError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, DataError>;

    /// All accounts of a service type, regardless of status — callers filter.
    async fn list_accounts_by_service(
        &self,
        service_type: ServiceType,
    ) -> Result<Vec<Account>, DataError>;

    async fn upsert_account(&self, account: Account) -> Result<(), DataError>;

    /// Atomically apply usage counters and refresh `last_used_at`/`status`.
    async fn apply_account_usage(
        &self,
        id: AccountId,
        delta: AccountUsageDelta,
    ) -> Result<(), DataError>;

    async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        error_message: Option<String>,
    ) -> Result<(), DataError>;

    /// Count a failed attempt without touching `status`/`error_message` —
    /// the Router sets those itself. Kept separate from
    /// `apply_account_usage`, which resets both on the assumption of a
    /// successful call.
    async fn increment_failed_request_count(&self, id: AccountId) -> Result<(), DataError>;

    async fn set_account_load(&self, id: AccountId, current_load: u8) -> Result<(), DataError>;

    async fn append_usage_record(&self, record: UsageRecord) -> Result<(), DataError>;

    /// Sum of `total_tokens` for `group_id` over the current UTC calendar
    /// day.
    async fn sum_tokens_today(
        &self,
        group_id: GroupId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, DataError>;

    /// Sum of `cost` for `group_id` over the current UTC calendar month.
    async fn sum_cost_this_month(
        &self,
        group_id: GroupId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Money, DataError>;

    async fn append_health_history(&self, row: HealthCheckHistoryRow) -> Result<(), DataError>;
}
