//! Smart Router (C5): request orchestration, retry, fail-over, metric
//! accumulation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Config, FailureModeOnProviderError};
use crate::domain::{
    AccountId, AccountStatus, GroupId, RequestStatus, ServiceType, UsageRecord, UserId,
};
use crate::error::RouterError;
use crate::load_balancer::LoadBalancer;
use crate::persistence::{AccountUsageDelta, DataService};
use crate::provider_client::{ProviderRegistry, ProviderRequest, ProviderResponse};
use crate::quota::QuotaGate;
use crate::resolver::Resolver;

pub struct RouteRequest {
    pub user_id: Option<UserId>,
    pub group_id: GroupId,
    pub service_type: ServiceType,
    pub model: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    /// Used by `consistent_hash`; empty falls back to `least_connections`.
    pub request_key: String,
    pub strategy: Option<crate::load_balancer::Strategy>,
}

pub struct RouteResult {
    pub account_id: AccountId,
    pub response: ProviderResponse,
}

pub struct Router {
    data: Arc<dyn DataService>,
    providers: Arc<ProviderRegistry>,
    quota_gate: QuotaGate,
    resolver: Resolver,
    load_balancer: LoadBalancer,
    config: Config,
}

impl Router {
    pub fn new(
        data: Arc<dyn DataService>,
        providers: Arc<ProviderRegistry>,
        resolver: Resolver,
        config: Config,
    ) -> Self {
        Self {
            quota_gate: QuotaGate::new(Arc::clone(&data)),
            data,
            providers,
            resolver,
            load_balancer: LoadBalancer::new(),
            config,
        }
    }

    /// `Route(groupId, request) → response | error`: quota gate, then
    /// resolve/select/send with retry across resolved candidates.
    pub async fn route(&self, request: RouteRequest) -> Result<RouteResult, RouterError> {
        self.quota_gate.check(request.group_id).await?;

        let group = self
            .data
            .get_group(request.group_id)
            .await
            .map_err(|_| RouterError::NoBindingConfigured)?
            .ok_or(RouterError::NoBindingConfigured)?;

        let mut last_error: Option<RouterError> = None;
        let mut last_account: Option<AccountId> = None;

        for attempt in 0..self.config.max_retries {
            let candidates = match self
                .resolver
                .resolve(&group, request.service_type)
                .await
            {
                Ok(c) => c,
                Err(e) => return Err(e.into()),
            };

            let ordered = LoadBalancer::apply_priority_ordering(candidates.clone());
            let strategy = request
                .strategy
                .unwrap_or_else(|| LoadBalancer::recommend(&ordered));
            let Some(selected_id) = self.load_balancer.select(
                &ordered,
                strategy,
                request.service_type,
                &request.request_key,
            ) else {
                return Err(RouterError::NoHealthyAccount);
            };

            let account = match self
                .resolver
                .resolve_healthy(candidates, selected_id, request.service_type)
                .await
            {
                Ok(a) => a,
                Err(e) => return Err(e.into()),
            };
            last_account = Some(account.id);

            let provider_request = ProviderRequest {
                model: request.model.clone(),
                prompt: request.prompt.clone(),
                max_tokens: request.max_tokens,
            };

            let Some(client) = self.providers.get(account.service_type) else {
                return Err(RouterError::ProviderError {
                    message: format!("no provider client registered for {:?}", account.service_type),
                });
            };

            let started_at = chrono::Utc::now();
            let call = client.send(&account, &provider_request, self.config.provider_call_timeout);
            let outcome = call.await;

            match outcome {
                Ok(response) => {
                    self.on_success(&account, &response, started_at, &request).await;
                    return Ok(RouteResult {
                        account_id: account.id,
                        response,
                    });
                }
                Err(err) => {
                    self.on_failure(&account, &err).await;

                    if attempt + 1 < self.config.max_retries {
                        let delay = match &err {
                            RouterError::QuotaOnRemoteSide { retry_after: Some(d) } => *d,
                            _ => self.config.retry_delay_base * (attempt + 1),
                        };
                        tokio::time::sleep(delay).await;
                    }

                    last_error = Some(err);
                }
            }
        }

        let last_error = last_error.unwrap_or(RouterError::NoHealthyAccount);
        warn!(
            group_id = %request.group_id,
            attempts = self.config.max_retries,
            error = %last_error,
            "request exhausted retries"
        );

        if let RouterError::QuotaOnRemoteSide { retry_after } = last_error {
            return Err(RouterError::RateLimited {
                attempts: self.config.max_retries,
                last_account,
                retry_after,
            });
        }

        Err(RouterError::ServiceUnavailable {
            attempts: self.config.max_retries,
            last_error: last_error.to_string(),
            last_account,
        })
    }

    async fn on_success(
        &self,
        account: &crate::domain::Account,
        response: &ProviderResponse,
        request_time: chrono::DateTime<chrono::Utc>,
        request: &RouteRequest,
    ) {
        let response_time = chrono::Utc::now();
        let response_time_ms = (response_time - request_time).num_milliseconds().max(0) as u64;

        let load_increase = (response_time_ms / 100).clamp(1, 10) as u8;
        let new_load = account.current_load.saturating_add(load_increase).min(100);
        let _ = self.data.set_account_load(account.id, new_load).await;
        self.schedule_load_decay(account.id, new_load);

        let delta = AccountUsageDelta {
            requests: 1,
            tokens: response.request_tokens + response.response_tokens,
            cost: response.cost,
        };
        let _ = self.data.apply_account_usage(account.id, delta).await;

        let record = UsageRecord::new(
            request.user_id,
            request.group_id,
            account.id,
            account.service_type,
            request.model.clone(),
            response.request_tokens,
            response.response_tokens,
            response.cost,
            request_time,
            response_time,
            RequestStatus::Success,
            None,
        );
        let _ = self.data.append_usage_record(record).await;

        info!(account_id = %account.id, response_time_ms, "request routed successfully");
    }

    async fn on_failure(&self, account: &crate::domain::Account, error: &RouterError) {
        let message = RouterError::truncated_message(&error.to_string());

        let should_flip = match self.config.failure_mode {
            FailureModeOnProviderError::HardFlip => true,
            FailureModeOnProviderError::SoftCount => {
                // Soft counting relies on the Pool Manager's own consecutive-
                // failure tracking; the Router only flips on a hard auth
                // failure, which is never transient.
                matches!(error.kind(), crate::error::RouterErrorKind::AuthenticationFailed)
            }
        };

        if should_flip {
            let _ = self
                .data
                .set_account_status(account.id, AccountStatus::Error, Some(message))
                .await;
        }

        let looks_api_level = matches!(
            error.kind(),
            crate::error::RouterErrorKind::AuthenticationFailed | crate::error::RouterErrorKind::ProviderError
        );
        if looks_api_level {
            if let Some(client) = self.providers.get(account.service_type) {
                client.invalidate(account.id).await;
            }
        }

        let _ = self.data.increment_failed_request_count(account.id).await;
    }

    /// Decay `currentLoad` by 5 after 60s.
    fn schedule_load_decay(&self, account_id: AccountId, load_at_success: u8) {
        let data = Arc::clone(&self.data);
        let decay_period = self.config.load_decay_period;
        tokio::spawn(async move {
            tokio::time::sleep(decay_period).await;
            if let Ok(Some(account)) = data.get_account(account_id).await {
                // Another success may have bumped load further in the
                // meantime; only decay relative to what this task observed.
                if account.current_load >= load_at_success {
                    let decayed = account.current_load.saturating_sub(5);
                    let _ = data.set_account_load(account_id, decayed).await;
                }
            }
        });
    }
}
