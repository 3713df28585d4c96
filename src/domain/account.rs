//! Account entity: a single back-end credential/quota unit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{AccountId, Money};

/// The family of back-end AI provider an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Claude,
    Gemini,
    Openai,
    Qwen,
}

impl ServiceType {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Openai => "openai",
            Self::Qwen => "qwen",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::Openai),
            "qwen" => Some(Self::Qwen),
            _ => None,
        }
    }
}

impl Default for ServiceType {
    /// Default `serviceType = claude`.
    fn default() -> Self {
        Self::Claude
    }
}

/// Whether an account is privately bound to one group or drawn from a pool.
///
/// Orthogonal to `ResourceBinding::mode`: a group's `shared` binding mode
/// queries accounts *by serviceType* whose `accountType = Shared`; the two
/// concepts are never collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Dedicated,
    Shared,
}

/// Operational state of an account, mutated by the Router and Pool Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Error,
}

/// A back-end provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub service_type: ServiceType,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub is_enabled: bool,
    /// Percentage-of-capacity load, `0..=100`.
    pub current_load: u8,
    pub supported_models: BTreeSet<String>,
    pub daily_limit: u64,
    /// Positive weight for `weighted_round_robin`; default 1.
    pub weight: u32,
    /// Lower priority value wins; `None` sorts after any `Some`.
    pub priority: Option<i32>,
    pub average_response_time_ms: Option<u64>,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: Money,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
}

impl Account {
    /// Selectable only if enabled, active, and under the load cap (`>= 95`
    /// is never selectable).
    pub fn is_selectable(&self) -> bool {
        self.is_enabled && self.status == AccountStatus::Active && self.current_load < 95
    }

    pub fn weight_or_default(&self) -> u32 {
        self.weight.max(1)
    }

    /// Truncate an error message to the 500-char cap the Router enforces.
    /// Truncates on a char boundary so a multibyte character straddling
    /// byte 500 never panics.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error_message = Some(crate::error::RouterError::truncated_message(&message));
    }
}
