//! The routing core's error taxonomy.
//!
//! Kinds, not type names: callers match on `RouterErrorKind` (via
//! `RouterError::kind`) to decide retryability and HTTP status, rather than
//! matching on the concrete error variant directly.

use thiserror::Error;

use crate::domain::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterErrorKind {
    NoBindingConfigured,
    DailyLimitExceeded,
    MonthlyBudgetExceeded,
    NoDedicatedAccounts,
    NoSharedPoolConfigured,
    NoSharedAccountAvailable,
    NoHealthyAccount,
    ProviderError,
    ProviderTimeout,
    AuthenticationFailed,
    QuotaOnRemoteSide,
    ServiceUnavailable,
    RateLimited,
}

impl RouterErrorKind {
    /// Whether the Router should re-enter the retry loop on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderError | Self::ProviderTimeout | Self::QuotaOnRemoteSide
        )
    }

    /// The HTTP status the thin API layer surfaces this as.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoBindingConfigured => 400,
            Self::DailyLimitExceeded => 429,
            Self::MonthlyBudgetExceeded => 429,
            Self::NoDedicatedAccounts => 503,
            Self::NoSharedPoolConfigured => 400,
            Self::NoSharedAccountAvailable => 503,
            Self::NoHealthyAccount => 503,
            Self::ProviderError | Self::ProviderTimeout => 503,
            Self::AuthenticationFailed => 502,
            Self::QuotaOnRemoteSide => 429,
            Self::ServiceUnavailable => 503,
            Self::RateLimited => 429,
        }
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("group has no resource binding configured")]
    NoBindingConfigured,

    #[error("daily token limit exceeded")]
    DailyLimitExceeded,

    #[error("monthly budget exceeded")]
    MonthlyBudgetExceeded,

    #[error("no enabled/active dedicated accounts for this service type")]
    NoDedicatedAccounts,

    #[error("no shared pool configured for this service type")]
    NoSharedPoolConfigured,

    #[error("no shared account available under the configured usage cap")]
    NoSharedAccountAvailable,

    #[error("no healthy account available among the candidates")]
    NoHealthyAccount,

    #[error("provider error: {message}")]
    ProviderError { message: String },

    #[error("provider call timed out")]
    ProviderTimeout,

    #[error("authentication with the provider failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("provider-side rate limit hit")]
    QuotaOnRemoteSide { retry_after: Option<std::time::Duration> },

    #[error("service unavailable after {attempts} attempt(s): {last_error}")]
    ServiceUnavailable {
        attempts: u32,
        last_error: String,
        last_account: Option<AccountId>,
    },

    /// Retries exhausted and the last cause was a provider-side rate limit.
    /// Surfaced as 429 rather than `ServiceUnavailable`'s 503.
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited {
        attempts: u32,
        last_account: Option<AccountId>,
        retry_after: Option<std::time::Duration>,
    },
}

impl RouterError {
    pub fn kind(&self) -> RouterErrorKind {
        match self {
            Self::NoBindingConfigured => RouterErrorKind::NoBindingConfigured,
            Self::DailyLimitExceeded => RouterErrorKind::DailyLimitExceeded,
            Self::MonthlyBudgetExceeded => RouterErrorKind::MonthlyBudgetExceeded,
            Self::NoDedicatedAccounts => RouterErrorKind::NoDedicatedAccounts,
            Self::NoSharedPoolConfigured => RouterErrorKind::NoSharedPoolConfigured,
            Self::NoSharedAccountAvailable => RouterErrorKind::NoSharedAccountAvailable,
            Self::NoHealthyAccount => RouterErrorKind::NoHealthyAccount,
            Self::ProviderError { .. } => RouterErrorKind::ProviderError,
            Self::ProviderTimeout => RouterErrorKind::ProviderTimeout,
            Self::AuthenticationFailed { .. } => RouterErrorKind::AuthenticationFailed,
            Self::QuotaOnRemoteSide { .. } => RouterErrorKind::QuotaOnRemoteSide,
            Self::ServiceUnavailable { .. } => RouterErrorKind::ServiceUnavailable,
            Self::RateLimited { .. } => RouterErrorKind::RateLimited,
        }
    }

    /// Truncate provider-supplied messages to the Router's 500-char cap
    /// before they're stored on an `Account` or wrapped into
    /// `ServiceUnavailable`. Truncates on a char boundary so a multibyte
    /// character straddling byte 500 never panics.
    pub fn truncated_message(message: &str) -> String {
        if message.len() <= 500 {
            return message.to_string();
        }
        message.chars().take(500).collect()
    }
}

/// Quota-specific rejection kinds, returned by `quota::QuotaGate::check`.
/// A narrower view of `RouterError` for callers that only care about quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("group has no resource binding configured")]
    NoBindingConfigured,
    #[error("daily token limit exceeded")]
    DailyLimitExceeded,
    #[error("monthly budget exceeded")]
    MonthlyBudgetExceeded,
}

impl From<QuotaError> for RouterError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::NoBindingConfigured => RouterError::NoBindingConfigured,
            QuotaError::DailyLimitExceeded => RouterError::DailyLimitExceeded,
            QuotaError::MonthlyBudgetExceeded => RouterError::MonthlyBudgetExceeded,
        }
    }
}

/// Resolver-specific rejection kinds, returned by `resolver::ResourceBindingResolver::resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no enabled/active dedicated accounts for this service type")]
    NoDedicatedAccounts,
    #[error("no shared pool configured for this service type")]
    NoSharedPoolConfigured,
    #[error("no shared account available under the configured usage cap")]
    NoSharedAccountAvailable,
    #[error("no healthy account available among the candidates")]
    NoHealthyAccount,
}

impl From<ResolveError> for RouterError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NoDedicatedAccounts => RouterError::NoDedicatedAccounts,
            ResolveError::NoSharedPoolConfigured => RouterError::NoSharedPoolConfigured,
            ResolveError::NoSharedAccountAvailable => RouterError::NoSharedAccountAvailable,
            ResolveError::NoHealthyAccount => RouterError::NoHealthyAccount,
        }
    }
}
