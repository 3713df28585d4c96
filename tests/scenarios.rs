//! End-to-end scenarios walking the full Router → Resolver → LoadBalancer →
//! ProviderClient chain against an in-memory data service and a scripted
//! fake provider.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carpool_router::cache::InMemoryKvCache;
use carpool_router::config::Config;
use carpool_router::domain::{
    Account, AccountId, AccountStatus, AccountType, BindingConfig, DedicatedAccountRef, Group,
    GroupId, HealthCheckResult, Money, OrganizationType, PreComputedAccountPool, PriorityLevel,
    ResourceBinding, ServiceType, SharedPoolRef,
};
use carpool_router::error::RouterError;
use carpool_router::load_balancer::Strategy;
use carpool_router::persistence::{DataService, InMemoryDataService};
use carpool_router::provider_client::{ProviderClient, ProviderRegistry, ProviderRequest, ProviderResponse};
use carpool_router::resolver::Resolver;
use carpool_router::router::{RouteRequest, Router};

fn account(name: &str, service_type: ServiceType, account_type: AccountType, load: u8) -> Account {
    Account {
        id: AccountId::new(),
        name: name.to_string(),
        service_type,
        account_type,
        status: AccountStatus::Active,
        is_enabled: true,
        current_load: load,
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

enum Outcome {
    Ok,
    Err(fn() -> RouterError),
}

/// A scripted provider: each `send()` call pops the next outcome off the
/// queue (or succeeds forever once it's empty). Health checks always report
/// healthy, since these scenarios exercise send-path failures, not the
/// Pool Manager's probe loop.
struct FakeProvider {
    service_type: ServiceType,
    script: Mutex<VecDeque<Outcome>>,
    calls: Mutex<u32>,
}

impl FakeProvider {
    fn new(service_type: ServiceType, script: Vec<Outcome>) -> Self {
        Self {
            service_type,
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    async fn send(
        &self,
        _account: &Account,
        _request: &ProviderRequest,
        _timeout: Duration,
    ) -> Result<ProviderResponse, RouterError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        match next {
            None | Some(Outcome::Ok) => Ok(ProviderResponse {
                request_tokens: 10,
                response_tokens: 20,
                cost: Money::from_cents(5),
                body: "hello".to_string(),
            }),
            Some(Outcome::Err(make)) => Err(make()),
        }
    }

    async fn health_check(&self, _account: &Account, _timeout: Duration) -> HealthCheckResult {
        HealthCheckResult {
            is_healthy: true,
            response_time_ms: 10,
            error_message: None,
        }
    }
}

fn pool_cache() -> Arc<InMemoryKvCache<Arc<PreComputedAccountPool>>> {
    Arc::new(InMemoryKvCache::new())
}

fn router_for(
    data: Arc<InMemoryDataService>,
    providers: Arc<ProviderRegistry>,
    config: Config,
) -> Router {
    let resolver = Resolver::new(
        data.clone(),
        providers.clone(),
        pool_cache(),
        Duration::from_secs(1),
    );
    Router::new(data, providers, resolver, config)
}

#[tokio::test]
async fn scenario_1_dedicated_success_picks_least_loaded_account() {
    let data = Arc::new(InMemoryDataService::new());

    let a1 = account("A1", ServiceType::Claude, AccountType::Dedicated, 30);
    let a2 = account("A2", ServiceType::Claude, AccountType::Dedicated, 10);
    data.seed_account(a1.clone()).await;
    data.seed_account(a2.clone()).await;

    let group = Group {
        id: GroupId::new(),
        organization_type: OrganizationType::Standalone,
        members: vec![],
        resource_binding: Some(ResourceBinding {
            config: BindingConfig::Dedicated {
                dedicated_accounts: vec![
                    DedicatedAccountRef {
                        account_id: a1.id,
                        service_type: ServiceType::Claude,
                        priority: 1,
                    },
                    DedicatedAccountRef {
                        account_id: a2.id,
                        service_type: ServiceType::Claude,
                        priority: 2,
                    },
                ],
            },
            daily_token_limit: Some(100_000),
            monthly_budget: None,
            priority_level: PriorityLevel::Medium,
            warning_threshold: 70,
            alert_threshold: 90,
        }),
    };
    data.seed_group(group.clone()).await;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FakeProvider::new(ServiceType::Claude, vec![])));
    let providers = Arc::new(registry);

    let router = router_for(data.clone(), providers, Config::default());

    let result = router
        .route(RouteRequest {
            user_id: None,
            group_id: group.id,
            service_type: ServiceType::Claude,
            model: "default".to_string(),
            prompt: "hi".to_string(),
            max_tokens: None,
            request_key: String::new(),
            strategy: Some(Strategy::LeastConnections),
        })
        .await
        .expect("expected a successful route");

    assert_eq!(result.account_id, a2.id, "least-loaded account A2 should be picked");

    let usage = data.sum_tokens_today(group.id, chrono::Utc::now()).await.unwrap();
    assert_eq!(usage, 30, "request_tokens(10) + response_tokens(20)");
}

#[tokio::test]
async fn scenario_2_quota_reject_blocks_before_any_provider_call() {
    let data = Arc::new(InMemoryDataService::new());

    let a1 = account("A1", ServiceType::Claude, AccountType::Dedicated, 10);
    data.seed_account(a1.clone()).await;

    let group = Group {
        id: GroupId::new(),
        organization_type: OrganizationType::Standalone,
        members: vec![],
        resource_binding: Some(ResourceBinding {
            config: BindingConfig::Dedicated {
                dedicated_accounts: vec![DedicatedAccountRef {
                    account_id: a1.id,
                    service_type: ServiceType::Claude,
                    priority: 1,
                }],
            },
            daily_token_limit: Some(100_000),
            monthly_budget: None,
            priority_level: PriorityLevel::Medium,
            warning_threshold: 70,
            alert_threshold: 90,
        }),
    };
    data.seed_group(group.clone()).await;

    // Pre-fill today's usage to exactly the daily limit.
    let record = carpool_router::domain::UsageRecord::new(
        None,
        group.id,
        a1.id,
        ServiceType::Claude,
        "default".to_string(),
        60_000,
        40_000,
        Money::ZERO,
        chrono::Utc::now(),
        chrono::Utc::now(),
        carpool_router::domain::RequestStatus::Success,
        None,
    );
    data.append_usage_record(record).await.unwrap();

    let fake = Arc::new(FakeProvider::new(ServiceType::Claude, vec![]));
    let mut registry = ProviderRegistry::new();
    registry.register(fake.clone());
    let providers = Arc::new(registry);

    let router = router_for(data, providers, Config::default());

    let err = router
        .route(RouteRequest {
            user_id: None,
            group_id: group.id,
            service_type: ServiceType::Claude,
            model: "default".to_string(),
            prompt: "hi".to_string(),
            max_tokens: None,
            request_key: String::new(),
            strategy: None,
        })
        .await
        .expect_err("quota should reject before any provider call");

    assert!(matches!(err, RouterError::DailyLimitExceeded));
    assert_eq!(fake.call_count(), 0, "provider must never be called once quota rejects");
}

#[tokio::test]
async fn scenario_3_single_account_fail_over_flips_to_error_and_exhausts_retries() {
    let data = Arc::new(InMemoryDataService::new());

    let a1 = account("A1", ServiceType::Claude, AccountType::Dedicated, 10);
    data.seed_account(a1.clone()).await;

    let group = Group {
        id: GroupId::new(),
        organization_type: OrganizationType::Standalone,
        members: vec![],
        resource_binding: Some(ResourceBinding {
            config: BindingConfig::Dedicated {
                dedicated_accounts: vec![DedicatedAccountRef {
                    account_id: a1.id,
                    service_type: ServiceType::Claude,
                    priority: 1,
                }],
            },
            daily_token_limit: None,
            monthly_budget: None,
            priority_level: PriorityLevel::Medium,
            warning_threshold: 70,
            alert_threshold: 90,
        }),
    };
    data.seed_group(group.clone()).await;

    let fake = Arc::new(FakeProvider::new(
        ServiceType::Claude,
        vec![
            Outcome::Err(|| RouterError::ProviderError {
                message: "boom".to_string(),
            }),
            Outcome::Ok,
            Outcome::Ok,
        ],
    ));
    let mut registry = ProviderRegistry::new();
    registry.register(fake.clone());
    let providers = Arc::new(registry);

    let mut config = Config::default();
    config.max_retries = 3;
    config.retry_delay_base = Duration::from_millis(1);
    let router = router_for(data.clone(), providers, config);

    let result = router
        .route(RouteRequest {
            user_id: None,
            group_id: group.id,
            service_type: ServiceType::Claude,
            model: "default".to_string(),
            prompt: "hi".to_string(),
            max_tokens: None,
            request_key: String::new(),
            strategy: None,
        })
        .await;

    // The only dedicated account flips to `error` on the first failure, so
    // the retry loop's second pass finds no candidates at all: the request
    // fails without a second provider call, even though MaxRetries=3.
    assert!(result.is_err());
    assert_eq!(fake.call_count(), 1, "no retry reaches the provider again once A1 has no peer");

    let stored = data.get_account(a1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Error);
}

#[tokio::test]
async fn scenario_4_hybrid_downgrades_to_shared_pool_on_primary_timeout() {
    let data = Arc::new(InMemoryDataService::new());

    let a1 = account("A1", ServiceType::Claude, AccountType::Dedicated, 10);
    let a3 = account("A3", ServiceType::Claude, AccountType::Shared, 20);
    data.seed_account(a1.clone()).await;
    data.seed_account(a3.clone()).await;

    let group = Group {
        id: GroupId::new(),
        organization_type: OrganizationType::Standalone,
        members: vec![],
        resource_binding: Some(ResourceBinding {
            config: BindingConfig::Hybrid {
                primary_accounts: vec![a1.id],
                fallback_pools: vec![ServiceType::Claude],
            },
            daily_token_limit: None,
            monthly_budget: None,
            priority_level: PriorityLevel::Medium,
            warning_threshold: 70,
            alert_threshold: 90,
        }),
    };
    data.seed_group(group.clone()).await;

    let fake = Arc::new(FakeProvider::new(
        ServiceType::Claude,
        vec![Outcome::Err(|| RouterError::ProviderTimeout), Outcome::Ok],
    ));
    let mut registry = ProviderRegistry::new();
    registry.register(fake.clone());
    let providers = Arc::new(registry);

    let mut config = Config::default();
    config.max_retries = 3;
    config.retry_delay_base = Duration::from_millis(1);
    let router = router_for(data.clone(), providers, config);

    let result = router
        .route(RouteRequest {
            user_id: None,
            group_id: group.id,
            service_type: ServiceType::Claude,
            model: "default".to_string(),
            prompt: "hi".to_string(),
            max_tokens: None,
            request_key: String::new(),
            strategy: None,
        })
        .await
        .expect("shared fallback should succeed");

    assert_eq!(result.account_id, a3.id, "second attempt should downgrade to the shared pool");

    let stored_a1 = data.get_account(a1.id).await.unwrap().unwrap();
    assert_eq!(stored_a1.status, AccountStatus::Error);
}

#[tokio::test]
async fn scenario_5_consistent_hash_is_stable_across_requests() {
    let data = Arc::new(InMemoryDataService::new());

    let a1 = account("A1", ServiceType::Claude, AccountType::Shared, 10);
    let a2 = account("A2", ServiceType::Claude, AccountType::Shared, 10);
    let a3 = account("A3", ServiceType::Claude, AccountType::Shared, 10);
    for a in [&a1, &a2, &a3] {
        data.seed_account(a.clone()).await;
    }

    let group = Group {
        id: GroupId::new(),
        organization_type: OrganizationType::Standalone,
        members: vec![],
        resource_binding: Some(ResourceBinding {
            config: BindingConfig::Shared {
                shared_pools: vec![SharedPoolRef {
                    service_type: ServiceType::Claude,
                    priority: 0,
                    max_usage_percent: 95,
                }],
            },
            daily_token_limit: None,
            monthly_budget: None,
            priority_level: PriorityLevel::Medium,
            warning_threshold: 70,
            alert_threshold: 90,
        }),
    };
    data.seed_group(group.clone()).await;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FakeProvider::new(ServiceType::Claude, vec![])));
    let providers = Arc::new(registry);

    let router = router_for(data, providers, Config::default());

    let make_request = |key: &str| RouteRequest {
        user_id: None,
        group_id: group.id,
        service_type: ServiceType::Claude,
        model: "default".to_string(),
        prompt: "hi".to_string(),
        max_tokens: None,
        request_key: key.to_string(),
        strategy: Some(Strategy::ConsistentHash),
    };

    let first = router.route(make_request("user-42")).await.unwrap();
    let second = router.route(make_request("user-42")).await.unwrap();
    assert_eq!(first.account_id, second.account_id);
}

#[tokio::test]
async fn scenario_6_pool_refresh_excludes_disabled_account_and_bumps_version() {
    let data = Arc::new(InMemoryDataService::new());

    let a1 = account("A1", ServiceType::Claude, AccountType::Shared, 10);
    let a2 = account("A2", ServiceType::Claude, AccountType::Shared, 10);
    data.seed_account(a1.clone()).await;
    data.seed_account(a2.clone()).await;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FakeProvider::new(ServiceType::Claude, vec![])));
    let providers = Arc::new(registry);

    let cache = pool_cache();
    let manager = Arc::new(carpool_router::pool_manager::PoolManager::new(
        data.clone(),
        providers,
        cache.clone(),
        Config::default(),
    ));

    manager.start().await;
    let cache_key = carpool_router::resolver::pool_cache_key(ServiceType::Claude);
    let before = carpool_router::cache::KvCache::get(&*cache, &cache_key)
        .await
        .expect("initial pool published at startup");
    assert_eq!(before.accounts.len(), 2);
    assert!(before.accounts.iter().any(|e| e.id == a1.id));

    let mut disabled = data.get_account(a1.id).await.unwrap().unwrap();
    disabled.is_enabled = false;
    data.upsert_account(disabled).await.unwrap();

    manager.trigger_pool_refresh(Some(ServiceType::Claude)).await;
    manager.stop();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let after = carpool_router::cache::KvCache::get(&*cache, &cache_key)
        .await
        .expect("pool still published after forced refresh");
    assert!(after.version > before.version, "forced refresh must bump version");
    assert_eq!(after.accounts.len(), 1, "disabled A1 must drop out of the refreshed pool");
    assert!(!after.accounts.iter().any(|e| e.id == a1.id), "A1 absent from accounts");
}
