//! Outbound calls to backend AI providers.
//!
//! `ProviderClient` is the seam between the routing core and the network:
//! a small async trait, one concrete impl per transport, registered by the
//! process boundary rather than looked up from a global.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::domain::{Account, HealthCheckResult, Money, ServiceType};
use crate::error::RouterError;

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub cost: Money,
    pub body: String,
}

/// One backend transport, keyed by `ServiceType`. A `ProviderClient` knows
/// how to talk to exactly one family of providers (Claude, Gemini, ...);
/// `Account` supplies the per-credential details.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn service_type(&self) -> ServiceType;

    async fn send(
        &self,
        account: &Account,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, RouterError>;

    async fn health_check(&self, account: &Account, timeout: Duration) -> HealthCheckResult;

    /// Drop any cached per-account state (auth tokens, keep-alive
    /// connections) after an error that looks API-level rather than
    /// transient. Default no-op; clients that cache nothing per account
    /// don't need to override it.
    async fn invalidate(&self, _account_id: crate::domain::AccountId) {}
}

/// Keeps one `ProviderClient` per `ServiceType`.
pub struct ProviderRegistry {
    clients: std::collections::HashMap<ServiceType, std::sync::Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            clients: std::collections::HashMap::new(),
        }
    }

    pub fn register(&mut self, client: std::sync::Arc<dyn ProviderClient>) {
        self.clients.insert(client.service_type(), client);
    }

    pub fn get(&self, service_type: ServiceType) -> Option<std::sync::Arc<dyn ProviderClient>> {
        self.clients.get(&service_type).cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A real HTTP-backed client, one per `ServiceType`, calling each
/// provider's OpenAI-compatible chat-completions endpoint.
pub struct HttpProviderClient {
    service_type: ServiceType,
    base_url: String,
    http: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(service_type: ServiceType, base_url: impl Into<String>) -> Self {
        Self {
            service_type,
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    async fn send(
        &self,
        account: &Account,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, RouterError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
        });

        let result = self
            .http
            .post(&url)
            .bearer_auth(&account.name)
            .json(&body)
            .timeout(timeout)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(RouterError::ProviderTimeout),
            Err(e) => {
                return Err(RouterError::ProviderError {
                    message: RouterError::truncated_message(&e.to_string()),
                })
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let text = response.text().await.unwrap_or_default();
            return Err(RouterError::AuthenticationFailed {
                message: RouterError::truncated_message(&text),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RouterError::QuotaOnRemoteSide { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RouterError::ProviderError {
                message: RouterError::truncated_message(&text),
            });
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouterError::ProviderError {
                message: RouterError::truncated_message(&e.to_string()),
            })?;

        let request_tokens = parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let response_tokens = parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0);
        let cost_cents = parsed["usage"]["cost_cents"].as_i64().unwrap_or(0);
        let body = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(ProviderResponse {
            request_tokens,
            response_tokens,
            cost: Money::from_cents(cost_cents),
            body,
        })
    }

    async fn health_check(&self, account: &Account, timeout: Duration) -> HealthCheckResult {
        let url = format!("{}/v1/models", self.base_url);
        let started = Instant::now();
        let result = self
            .http
            .get(&url)
            .bearer_auth(&account.name)
            .timeout(timeout)
            .send()
            .await;

        let response_time_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(r) if r.status().is_success() => HealthCheckResult {
                is_healthy: true,
                response_time_ms,
                error_message: None,
            },
            Ok(r) => HealthCheckResult {
                is_healthy: false,
                response_time_ms,
                error_message: Some(format!("unhealthy status {}", r.status())),
            },
            Err(e) => HealthCheckResult {
                is_healthy: false,
                response_time_ms,
                error_message: Some(RouterError::truncated_message(&e.to_string())),
            },
        }
    }
}
