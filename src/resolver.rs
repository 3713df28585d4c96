//! Resource-Binding Resolver (C3): produces the candidate accounts the
//! Load Balancer chooses from.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::KvCache;
use crate::domain::{Account, AccountId, BindingConfig, Group, PreComputedAccountPool, ServiceType};
use crate::error::ResolveError;
use crate::persistence::DataService;
use crate::provider_client::ProviderRegistry;

/// Cache key the Pool Manager publishes `PreComputedAccountPool` snapshots
/// under, one per service type.
pub fn pool_cache_key(service_type: ServiceType) -> String {
    format!("pool:{}", service_type.id())
}

pub struct Resolver {
    data: Arc<dyn DataService>,
    providers: Arc<ProviderRegistry>,
    pool_cache: Arc<dyn KvCache<Arc<PreComputedAccountPool>>>,
    health_probe_timeout: Duration,
}

impl Resolver {
    pub fn new(
        data: Arc<dyn DataService>,
        providers: Arc<ProviderRegistry>,
        pool_cache: Arc<dyn KvCache<Arc<PreComputedAccountPool>>>,
        health_probe_timeout: Duration,
    ) -> Self {
        Self {
            data,
            providers,
            pool_cache,
            health_probe_timeout,
        }
    }

    /// Resolve a group's binding down to candidate accounts. Returns the
    /// full candidate set; callers run the Load Balancer over it.
    pub async fn resolve(
        &self,
        group: &Group,
        request_service_type: ServiceType,
    ) -> Result<Vec<Account>, ResolveError> {
        let binding = group
            .resource_binding
            .as_ref()
            .ok_or(ResolveError::NoDedicatedAccounts)?;

        match &binding.config {
            BindingConfig::Dedicated { dedicated_accounts } => {
                self.resolve_dedicated(dedicated_accounts, request_service_type)
                    .await
            }
            BindingConfig::Shared { shared_pools } => {
                self.resolve_shared(shared_pools, request_service_type).await
            }
            BindingConfig::Hybrid {
                primary_accounts,
                fallback_pools,
            } => {
                let dedicated_refs: Vec<_> = primary_accounts
                    .iter()
                    .map(|id| crate::domain::DedicatedAccountRef {
                        account_id: *id,
                        service_type: request_service_type,
                        priority: 0,
                    })
                    .collect();

                match self
                    .resolve_dedicated(&dedicated_refs, request_service_type)
                    .await
                {
                    Ok(accounts) => Ok(accounts),
                    Err(e) => {
                        warn!(error = %e, "hybrid binding downgrading to shared pool");
                        let shared_refs: Vec<_> = fallback_pools
                            .iter()
                            .filter(|st| **st == request_service_type)
                            .map(|st| crate::domain::SharedPoolRef {
                                service_type: *st,
                                priority: 0,
                                max_usage_percent: 95,
                            })
                            .collect();
                        self.resolve_shared(&shared_refs, request_service_type).await
                    }
                }
            }
        }
    }

    async fn resolve_dedicated(
        &self,
        dedicated_accounts: &[crate::domain::DedicatedAccountRef],
        request_service_type: ServiceType,
    ) -> Result<Vec<Account>, ResolveError> {
        let mut out = Vec::new();
        for reference in dedicated_accounts
            .iter()
            .filter(|r| r.service_type == request_service_type)
        {
            if let Some(account) = self
                .data
                .get_account(reference.account_id)
                .await
                .unwrap_or(None)
            {
                if account.is_enabled && account.status == crate::domain::AccountStatus::Active {
                    out.push(account);
                }
            }
        }
        if out.is_empty() {
            return Err(ResolveError::NoDedicatedAccounts);
        }
        Ok(out)
    }

    async fn resolve_shared(
        &self,
        shared_pools: &[crate::domain::SharedPoolRef],
        request_service_type: ServiceType,
    ) -> Result<Vec<Account>, ResolveError> {
        let Some(pool_ref) = shared_pools
            .iter()
            .find(|p| p.service_type == request_service_type)
        else {
            return Err(ResolveError::NoSharedPoolConfigured);
        };

        let all = self
            .data
            .list_accounts_by_service(request_service_type)
            .await
            .unwrap_or_default();

        let out: Vec<Account> = all
            .into_iter()
            .filter(|a| {
                a.account_type == crate::domain::AccountType::Shared
                    && a.is_enabled
                    && a.status == crate::domain::AccountStatus::Active
                    && a.current_load < pool_ref.max_usage_percent
            })
            .collect();

        if out.is_empty() {
            return Err(ResolveError::NoSharedAccountAvailable);
        }
        Ok(out)
    }

    /// Health fallback: probe `selected` first; if it fails, iterate the
    /// remaining candidates in Load-Balancer-score order until one passes.
    pub async fn resolve_healthy(
        &self,
        candidates: Vec<Account>,
        selected: AccountId,
        service_type: ServiceType,
    ) -> Result<Account, ResolveError> {
        let pool = self.pool_cache.get(&pool_cache_key(service_type)).await;
        let score_of = |id: AccountId, fallback: &Account| -> f64 {
            pool.as_ref()
                .and_then(|p| p.accounts.iter().find(|e| e.id == id))
                .map(|e| e.score)
                .unwrap_or_else(|| crate::load_balancer::health_score(fallback) as f64)
        };
        let mut ordered: Vec<Account> = candidates;
        ordered.sort_by(|a, b| {
            score_of(b.id, b)
                .partial_cmp(&score_of(a.id, a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Move the already-selected account to the front so it is tried first.
        if let Some(pos) = ordered.iter().position(|a| a.id == selected) {
            let account = ordered.remove(pos);
            ordered.insert(0, account);
        }

        for account in ordered {
            if self.probe_healthy(&account).await {
                return Ok(account);
            }
        }
        Err(ResolveError::NoHealthyAccount)
    }

    async fn probe_healthy(&self, account: &Account) -> bool {
        let Some(client) = self.providers.get(account.service_type) else {
            return false;
        };
        client
            .health_check(account, self.health_probe_timeout)
            .await
            .is_healthy
    }
}
