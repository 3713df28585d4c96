//! Account-Pool Manager (C4): precomputes and refreshes, per service type,
//! a ranked list of healthy accounts.
//!
//! Two concurrent loops per service type, using the `tokio::spawn(async
//! move { ... })` background-task idiom and `tokio_util`'s
//! `CancellationToken` for graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::KvCache;
use crate::config::{Config, ScoreWeights};
use crate::domain::{
    Account, AccountId, AccountStatus, PoolAccountEntry, PreComputedAccountPool, ServiceType,
};
use crate::persistence::{DataService, HealthCheckHistoryRow};
use crate::provider_client::ProviderRegistry;
use crate::resolver::pool_cache_key;

/// In-cache health status for one account, TTL ~= 2x the health-check
/// interval.
#[derive(Debug, Clone, Copy)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub consecutive_failures: u32,
    pub last_checked_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregate status for `GetStatus()`.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub pool_size: usize,
    pub healthy_count: usize,
    pub last_update: chrono::DateTime<chrono::Utc>,
    pub avg_score: f64,
}

struct HealthCache {
    entries: RwLock<HashMap<AccountId, HealthStatus>>,
}

impl HealthCache {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, id: AccountId) -> Option<HealthStatus> {
        self.entries.read().await.get(&id).copied()
    }

    async fn set(&self, id: AccountId, status: HealthStatus) {
        self.entries.write().await.insert(id, status);
    }
}

pub struct PoolManager {
    data: Arc<dyn DataService>,
    providers: Arc<ProviderRegistry>,
    pool_cache: Arc<dyn KvCache<Arc<PreComputedAccountPool>>>,
    health_cache: Arc<HealthCache>,
    config: Config,
    status: RwLock<HashMap<ServiceType, ServiceStatus>>,
    cancellation: CancellationToken,
}

impl PoolManager {
    pub fn new(
        data: Arc<dyn DataService>,
        providers: Arc<ProviderRegistry>,
        pool_cache: Arc<dyn KvCache<Arc<PreComputedAccountPool>>>,
        config: Config,
    ) -> Self {
        Self {
            data,
            providers,
            pool_cache,
            health_cache: Arc::new(HealthCache::new()),
            config,
            status: RwLock::new(HashMap::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Enumerate every service type with >=1 enabled account, run an
    /// initial health check and pool build for each, then schedule both
    /// loops.
    pub async fn start(self: &Arc<Self>) {
        for service_type in self.discover_service_types().await {
            self.run_health_check(service_type).await;
            self.run_pool_refresh(service_type).await;
            self.spawn_loops(service_type);
        }
    }

    /// Cancels all timers; in-flight probes observe the token on their
    /// next check and terminate promptly.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }

    pub async fn trigger_health_check(self: &Arc<Self>, service_type: Option<ServiceType>) {
        match service_type {
            Some(st) => self.run_health_check(st).await,
            None => {
                for st in self.discover_service_types().await {
                    self.run_health_check(st).await;
                }
            }
        }
    }

    /// Force an immediate pool rebuild outside the refresh ticker, mirroring
    /// `trigger_health_check`. Used after an admin change (e.g. disabling an
    /// account) that shouldn't wait for `PoolRefreshInterval`.
    pub async fn trigger_pool_refresh(self: &Arc<Self>, service_type: Option<ServiceType>) {
        match service_type {
            Some(st) => self.run_pool_refresh(st).await,
            None => {
                for st in self.discover_service_types().await {
                    self.run_pool_refresh(st).await;
                }
            }
        }
    }

    pub async fn get_status(&self) -> HashMap<ServiceType, ServiceStatus> {
        self.status.read().await.clone()
    }

    async fn discover_service_types(&self) -> Vec<ServiceType> {
        let mut found = Vec::new();
        for service_type in [
            ServiceType::Claude,
            ServiceType::Gemini,
            ServiceType::Openai,
            ServiceType::Qwen,
        ] {
            let accounts = self
                .data
                .list_accounts_by_service(service_type)
                .await
                .unwrap_or_default();
            if accounts.iter().any(|a| a.is_enabled) {
                found.push(service_type);
            }
        }
        found
    }

    fn spawn_loops(self: &Arc<Self>, service_type: ServiceType) {
        let health_manager = Arc::clone(self);
        let health_token = self.cancellation.clone();
        let health_interval = self.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.tick().await; // first tick fires immediately; startup already ran one pass
            loop {
                tokio::select! {
                    _ = health_token.cancelled() => break,
                    _ = ticker.tick() => health_manager.run_health_check(service_type).await,
                }
            }
        });

        let pool_manager = Arc::clone(self);
        let pool_token = self.cancellation.clone();
        let pool_interval = self.config.pool_refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = pool_token.cancelled() => break,
                    _ = ticker.tick() => pool_manager.run_pool_refresh(service_type).await,
                }
            }
        });
    }

    async fn run_health_check(&self, service_type: ServiceType) {
        let Some(client) = self.providers.get(service_type) else {
            return;
        };
        let accounts: Vec<Account> = self
            .data
            .list_accounts_by_service(service_type)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|a| a.is_enabled)
            .collect();

        for batch in accounts.chunks(self.config.parallel_health_checks as usize) {
            let checks = batch.iter().map(|account| {
                let client = Arc::clone(&client);
                let account = account.clone();
                let timeout = self.config.health_check_timeout;
                async move {
                    let outcome = client.health_check(&account, timeout).await;
                    (account, outcome)
                }
            });
            let results = futures::future::join_all(checks).await;

            for (account, outcome) in results {
                self.apply_health_result(&account, outcome).await;
            }
        }
    }

    async fn apply_health_result(
        &self,
        account: &Account,
        outcome: crate::domain::HealthCheckResult,
    ) {
        let previous = self.health_cache.get(account.id).await;
        let consecutive_failures = if outcome.is_healthy {
            0
        } else {
            previous.map(|p| p.consecutive_failures + 1).unwrap_or(1)
        };

        self.health_cache
            .set(
                account.id,
                HealthStatus {
                    is_healthy: outcome.is_healthy,
                    response_time_ms: outcome.response_time_ms,
                    consecutive_failures,
                    last_checked_at: chrono::Utc::now(),
                },
            )
            .await;

        let _ = self
            .data
            .append_health_history(HealthCheckHistoryRow {
                account_id: account.id,
                is_healthy: outcome.is_healthy,
                response_time_ms: outcome.response_time_ms,
                error_message: outcome.error_message.clone(),
                checked_at: chrono::Utc::now(),
            })
            .await;

        if !outcome.is_healthy && consecutive_failures >= self.config.max_consecutive_failures {
            warn!(account_id = %account.id, consecutive_failures, "account marked error after repeated health-check failures");
            let _ = self
                .data
                .set_account_status(
                    account.id,
                    AccountStatus::Error,
                    outcome
                        .error_message
                        .map(|m| crate::error::RouterError::truncated_message(&m)),
                )
                .await;
        } else if outcome.is_healthy && account.status == AccountStatus::Error {
            info!(account_id = %account.id, "account recovered, restoring to active");
            let _ = self
                .data
                .set_account_status(account.id, AccountStatus::Active, None)
                .await;
        }
    }

    async fn run_pool_refresh(&self, service_type: ServiceType) {
        let accounts: Vec<Account> = self
            .data
            .list_accounts_by_service(service_type)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|a| a.is_enabled && a.status == AccountStatus::Active)
            .collect();

        let mut entries = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let health = self.health_cache.get(account.id).await;
            let score = compute_score(account, health, &self.config.score_weights);
            entries.push(PoolAccountEntry {
                id: account.id,
                name: account.name.clone(),
                service_type,
                current_load: account.current_load,
                priority: account.priority,
                is_healthy: health.map(|h| h.is_healthy).unwrap_or(true),
                score,
            });
        }
        entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let previous_version = self
            .pool_cache
            .get(&pool_cache_key(service_type))
            .await
            .map(|p| p.version)
            .unwrap_or(0);

        let pool = Arc::new(PreComputedAccountPool {
            service_type,
            accounts: entries,
            last_update: chrono::Utc::now(),
            version: previous_version + 1,
        });

        self.status.write().await.insert(
            service_type,
            ServiceStatus {
                pool_size: pool.accounts.len(),
                healthy_count: pool.healthy_count(),
                last_update: pool.last_update,
                avg_score: pool.average_score(),
            },
        );

        self.pool_cache
            .set(
                &pool_cache_key(service_type),
                pool,
                self.config.pool_refresh_interval * 3,
            )
            .await;
    }
}

/// Weighted health/load score used to rank accounts within a pool. Priority
/// buckets (1..=4) are derived by callers from the returned score, not
/// stored here.
fn compute_score(
    account: &Account,
    health: Option<HealthStatus>,
    weights: &ScoreWeights,
) -> f64 {
    let mut score: f64 = 100.0;

    let load_penalty = account.current_load as f64 * weights.load;
    score -= 40.0 - (40.0 - load_penalty).max(0.0);

    let is_healthy = health.map(|h| h.is_healthy).unwrap_or(true);
    if !is_healthy {
        score -= 30.0 * weights.health;
    }

    let consecutive_failures = health.map(|h| h.consecutive_failures).unwrap_or(0);
    if consecutive_failures > 0 {
        score -= (consecutive_failures as f64 * 5.0).min(20.0);
    }

    let response_time_ms = health.map(|h| h.response_time_ms).unwrap_or(0) as f64;
    let rt_penalty = (response_time_ms / 100.0) * weights.response_time;
    score -= 20.0 - (20.0 - rt_penalty).max(0.0);

    let last_used_age_min = account
        .last_used_at
        .map(|t| (chrono::Utc::now() - t).num_seconds().max(0) as f64 / 60.0)
        .unwrap_or(f64::MAX);
    let recent_penalty = (last_used_age_min / 60.0) * weights.recent_use;
    score -= 10.0 - (10.0 - recent_penalty).max(0.0);

    score.clamp(0.0, 100.0)
}

/// Priority bucket for a score.
pub fn priority_bucket(score: f64) -> u8 {
    if score >= 80.0 {
        1
    } else if score >= 60.0 {
        2
    } else if score >= 40.0 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, Money};
    use std::collections::BTreeSet;

    fn account() -> Account {
        Account {
            id: AccountId::new(),
            name: "a".into(),
            service_type: ServiceType::Claude,
            account_type: AccountType::Shared,
            status: AccountStatus::Active,
            is_enabled: true,
            current_load: 0,
            supported_models: BTreeSet::new(),
            daily_limit: 0,
            weight: 1,
            priority: None,
            average_response_time_ms: None,
            total_requests: 0,
            total_tokens: 0,
            total_cost: Money::ZERO,
            last_used_at: None,
            error_message: None,
        }
    }

    #[test]
    fn healthy_idle_account_scores_near_max() {
        let score = compute_score(&account(), None, &ScoreWeights::default());
        assert!(score > 85.0, "expected high score, got {score}");
    }

    #[test]
    fn unhealthy_account_scores_lower_than_healthy() {
        let weights = ScoreWeights::default();
        let healthy = compute_score(
            &account(),
            Some(HealthStatus {
                is_healthy: true,
                response_time_ms: 100,
                consecutive_failures: 0,
                last_checked_at: chrono::Utc::now(),
            }),
            &weights,
        );
        let unhealthy = compute_score(
            &account(),
            Some(HealthStatus {
                is_healthy: false,
                response_time_ms: 100,
                consecutive_failures: 2,
                last_checked_at: chrono::Utc::now(),
            }),
            &weights,
        );
        assert!(unhealthy < healthy);
    }

    #[test]
    fn priority_buckets_match_thresholds() {
        assert_eq!(priority_bucket(95.0), 1);
        assert_eq!(priority_bucket(65.0), 2);
        assert_eq!(priority_bucket(45.0), 3);
        assert_eq!(priority_bucket(10.0), 4);
    }
}
