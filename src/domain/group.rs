//! Group and ResourceBinding entities.

use serde::{Deserialize, Serialize};

use super::{AccountId, GroupId, Money, ServiceType, UserId};

/// A tagged variant rather than a bare string, each case carrying only
/// what it needs instead of leaving unrelated permission paths to share
/// one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrganizationType {
    Standalone,
    EnterpriseGroup { enterprise_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    Dedicated,
    Shared,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedicatedAccountRef {
    pub account_id: AccountId,
    pub service_type: ServiceType,
    /// Lower value = higher priority.
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedPoolRef {
    pub service_type: ServiceType,
    pub priority: i32,
    pub max_usage_percent: u8,
}

/// Mode-specific configuration. Modeled as a tagged enum so each case only
/// carries the fields it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BindingConfig {
    Dedicated {
        dedicated_accounts: Vec<DedicatedAccountRef>,
    },
    Shared {
        shared_pools: Vec<SharedPoolRef>,
    },
    Hybrid {
        primary_accounts: Vec<AccountId>,
        fallback_pools: Vec<ServiceType>,
    },
}

impl BindingConfig {
    pub fn mode(&self) -> BindingMode {
        match self {
            Self::Dedicated { .. } => BindingMode::Dedicated,
            Self::Shared { .. } => BindingMode::Shared,
            Self::Hybrid { .. } => BindingMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub config: BindingConfig,
    /// Tokens/day; `None` means unlimited, `Some(0)` means deny-all.
    pub daily_token_limit: Option<u64>,
    pub monthly_budget: Option<Money>,
    pub priority_level: PriorityLevel,
    /// Percent, `0..=100`; `warning_threshold <= alert_threshold` (Invariant 4).
    pub warning_threshold: u8,
    pub alert_threshold: u8,
}

impl ResourceBinding {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.warning_threshold > self.alert_threshold {
            return Err("warning_threshold must be <= alert_threshold");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub organization_type: OrganizationType,
    pub members: Vec<Member>,
    pub resource_binding: Option<ResourceBinding>,
}
