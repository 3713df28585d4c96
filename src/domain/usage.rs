//! Append-only usage accounting.

use serde::Serialize;

use super::{AccountId, GroupId, Money, ServiceType, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    Error,
}

/// One row per completed (or failed) request. Append-only; never mutated.
///
/// `request_tokens + response_tokens == total_tokens` is enforced in the
/// constructor so a malformed record can never be built.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub user_id: Option<UserId>,
    pub group_id: GroupId,
    pub account_id: AccountId,
    pub service_type: ServiceType,
    pub model: String,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub total_tokens: u64,
    pub cost: Money,
    pub request_time: chrono::DateTime<chrono::Utc>,
    pub response_time: chrono::DateTime<chrono::Utc>,
    pub status: RequestStatus,
    pub error_type: Option<String>,
}

impl UsageRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Option<UserId>,
        group_id: GroupId,
        account_id: AccountId,
        service_type: ServiceType,
        model: String,
        request_tokens: u64,
        response_tokens: u64,
        cost: Money,
        request_time: chrono::DateTime<chrono::Utc>,
        response_time: chrono::DateTime<chrono::Utc>,
        status: RequestStatus,
        error_type: Option<String>,
    ) -> Self {
        Self {
            user_id,
            group_id,
            account_id,
            service_type,
            model,
            request_tokens,
            response_tokens,
            total_tokens: request_tokens + response_tokens,
            cost,
            request_time,
            response_time,
            status,
            error_type,
        }
    }
}
