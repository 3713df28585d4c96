//! Quota Gate (C1): fail-fast admission control before any network call.

use std::sync::Arc;

use crate::domain::GroupId;
use crate::error::QuotaError;
use crate::persistence::DataService;

pub struct QuotaGate {
    data: Arc<dyn DataService>,
}

impl QuotaGate {
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self { data }
    }

    /// `Check(groupId, request)` — rejects on the first exceeded limit.
    ///
    /// Read-only: does not pre-reserve tokens. Concurrent requests may
    /// overshoot slightly within one window; usage accounting reconciles.
    pub async fn check(&self, group_id: GroupId) -> Result<(), QuotaError> {
        let group = self
            .data
            .get_group(group_id)
            .await
            .map_err(|_| QuotaError::NoBindingConfigured)?
            .ok_or(QuotaError::NoBindingConfigured)?;

        let binding = group
            .resource_binding
            .as_ref()
            .ok_or(QuotaError::NoBindingConfigured)?;

        let now = chrono::Utc::now();

        // `daily_token_limit = None` means unlimited; `Some(0)` means deny-all.
        if let Some(limit) = binding.daily_token_limit {
            let used = self
                .data
                .sum_tokens_today(group_id, now)
                .await
                .map_err(|_| QuotaError::NoBindingConfigured)?;
            if used >= limit {
                return Err(QuotaError::DailyLimitExceeded);
            }
        }

        if let Some(budget) = binding.monthly_budget {
            let spent = self
                .data
                .sum_cost_this_month(group_id, now)
                .await
                .map_err(|_| QuotaError::NoBindingConfigured)?;
            if spent >= budget {
                return Err(QuotaError::MonthlyBudgetExceeded);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BindingConfig, Group, Money, OrganizationType, PriorityLevel, ResourceBinding};
    use crate::persistence::InMemoryDataService;

    fn group_with(daily_token_limit: Option<u64>, monthly_budget: Option<Money>) -> Group {
        Group {
            id: GroupId::new(),
            organization_type: OrganizationType::Standalone,
            members: vec![],
            resource_binding: Some(ResourceBinding {
                config: BindingConfig::Shared { shared_pools: vec![] },
                daily_token_limit,
                monthly_budget,
                priority_level: PriorityLevel::Medium,
                warning_threshold: 70,
                alert_threshold: 90,
            }),
        }
    }

    #[tokio::test]
    async fn rejects_when_no_binding_configured() {
        let data = Arc::new(InMemoryDataService::new());
        let gate = QuotaGate::new(data.clone());
        let group = Group {
            id: GroupId::new(),
            organization_type: OrganizationType::Standalone,
            members: vec![],
            resource_binding: None,
        };
        data.seed_group(group.clone()).await;
        assert_eq!(
            gate.check(group.id).await.unwrap_err(),
            QuotaError::NoBindingConfigured
        );
    }

    #[tokio::test]
    async fn zero_daily_limit_denies_all() {
        let data = Arc::new(InMemoryDataService::new());
        let gate = QuotaGate::new(data.clone());
        let group = group_with(Some(0), None);
        data.seed_group(group.clone()).await;
        assert_eq!(
            gate.check(group.id).await.unwrap_err(),
            QuotaError::DailyLimitExceeded
        );
    }

    #[tokio::test]
    async fn none_daily_limit_is_unlimited() {
        let data = Arc::new(InMemoryDataService::new());
        let gate = QuotaGate::new(data.clone());
        let group = group_with(None, None);
        data.seed_group(group.clone()).await;
        assert!(gate.check(group.id).await.is_ok());
    }
}
