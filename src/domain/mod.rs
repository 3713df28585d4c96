//! Core entity types shared by every routing component.
//!
//! These are plain data types with no persistence or cache awareness —
//! `persistence::DataService` and `cache::KvCache` are the only things that
//! know how entities are stored.

mod account;
mod group;
mod health;
mod pool;
mod usage;

pub use account::{Account, AccountStatus, AccountType, ServiceType};
pub use group::{BindingConfig, BindingMode, DedicatedAccountRef, Group, OrganizationType,
                 PriorityLevel, ResourceBinding, SharedPoolRef};
pub use health::HealthCheckResult;
pub use pool::{PoolAccountEntry, PreComputedAccountPool};
pub use usage::{RequestStatus, UsageRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(GroupId);
uuid_id!(AccountId);
uuid_id!(UserId);

/// Fixed-point money, stored as hundredths of a currency unit.
///
/// Floats would make the Quota Gate's `>=` comparisons flaky right at the
/// boundary (`dailyTokenLimit = current_usage` exactly must still trip
/// `DailyLimitExceeded`), so this crate uses an exact integer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Money {
    pub cents: i64,
}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn as_dollars(&self) -> f64 {
        self.cents as f64 / 100.0
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money::from_cents(self.cents + rhs.cents)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}
