//! Health-check probe outcomes.
//!
//! The live `HealthStatus` entity is owned by the Pool Manager's cache (see
//! `pool_manager::HealthCache`); this module only defines the shape of a
//! single probe result, which is what
//! `provider_client::ProviderClient::health_check` returns.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}
