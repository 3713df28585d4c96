//! In-memory `DataService`, used by tests and the scenario suite.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{
    Account, AccountId, AccountStatus, Group, GroupId, Money, ServiceType, UsageRecord,
};

use super::{AccountUsageDelta, DataError, DataService, HealthCheckHistoryRow};

#[derive(Default)]
struct Inner {
    groups: HashMap<GroupId, Group>,
    accounts: HashMap<AccountId, Account>,
    usage: Vec<UsageRecord>,
    health_history: Vec<HealthCheckHistoryRow>,
}

/// Simple in-memory store. Not optimized for scale — this is a test double,
/// not a production backend (that's `SqliteDataService`).
#[derive(Default, Clone)]
pub struct InMemoryDataService {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_group(&self, group: Group) {
        self.inner.write().await.groups.insert(group.id, group);
    }

    pub async fn seed_account(&self, account: Account) {
        self.inner
            .write()
            .await
            .accounts
            .insert(account.id, account);
    }
}

#[async_trait]
impl DataService for InMemoryDataService {
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, DataError> {
        Ok(self.inner.read().await.groups.get(&id).cloned())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, DataError> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn list_accounts_by_service(
        &self,
        service_type: ServiceType,
    ) -> Result<Vec<Account>, DataError> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .filter(|a| a.service_type == service_type)
            .cloned()
            .collect())
    }

    async fn upsert_account(&self, account: Account) -> Result<(), DataError> {
        self.inner.write().await.accounts.insert(account.id, account);
        Ok(())
    }

    async fn apply_account_usage(
        &self,
        id: AccountId,
        delta: AccountUsageDelta,
    ) -> Result<(), DataError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| DataError::Backend(format!("unknown account {id}")))?;
        account.total_requests += delta.requests;
        account.total_tokens += delta.tokens;
        account.total_cost = account.total_cost + delta.cost;
        account.last_used_at = Some(Utc::now());
        account.status = AccountStatus::Active;
        account.error_message = None;
        Ok(())
    }

    async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        error_message: Option<String>,
    ) -> Result<(), DataError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| DataError::Backend(format!("unknown account {id}")))?;
        account.status = status;
        account.error_message = error_message;
        Ok(())
    }

    async fn increment_failed_request_count(&self, id: AccountId) -> Result<(), DataError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| DataError::Backend(format!("unknown account {id}")))?;
        account.total_requests += 1;
        Ok(())
    }

    async fn set_account_load(&self, id: AccountId, current_load: u8) -> Result<(), DataError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| DataError::Backend(format!("unknown account {id}")))?;
        account.current_load = current_load;
        Ok(())
    }

    async fn append_usage_record(&self, record: UsageRecord) -> Result<(), DataError> {
        self.inner.write().await.usage.push(record);
        Ok(())
    }

    async fn sum_tokens_today(
        &self,
        group_id: GroupId,
        now: chrono::DateTime<Utc>,
    ) -> Result<u64, DataError> {
        let inner = self.inner.read().await;
        let today = now.date_naive();
        Ok(inner
            .usage
            .iter()
            .filter(|r| r.group_id == group_id && r.request_time.date_naive() == today)
            .map(|r| r.total_tokens)
            .sum())
    }

    async fn sum_cost_this_month(
        &self,
        group_id: GroupId,
        now: chrono::DateTime<Utc>,
    ) -> Result<Money, DataError> {
        let inner = self.inner.read().await;
        let (year, month) = (now.year(), now.month());
        Ok(inner
            .usage
            .iter()
            .filter(|r| {
                r.group_id == group_id
                    && r.request_time.year() == year
                    && r.request_time.month() == month
            })
            .map(|r| r.cost)
            .sum())
    }

    async fn append_health_history(&self, row: HealthCheckHistoryRow) -> Result<(), DataError> {
        self.inner.write().await.health_history.push(row);
        Ok(())
    }
}
