//! PreComputedAccountPool: the Pool Manager's published, versioned ranking.

use serde::Serialize;

use super::{AccountId, ServiceType};

#[derive(Debug, Clone, Serialize)]
pub struct PoolAccountEntry {
    pub id: AccountId,
    pub name: String,
    pub service_type: ServiceType,
    pub current_load: u8,
    pub priority: Option<i32>,
    pub is_healthy: bool,
    pub score: f64,
}

/// One per service type. `version` strictly increases (Invariant 5);
/// readers must not mix entries from two versions, so this type is always
/// handed out as a whole, immutable snapshot (`Arc<PreComputedAccountPool>`).
#[derive(Debug, Clone, Serialize)]
pub struct PreComputedAccountPool {
    pub service_type: ServiceType,
    /// Sorted by `score` descending.
    pub accounts: Vec<PoolAccountEntry>,
    pub last_update: chrono::DateTime<chrono::Utc>,
    pub version: u64,
}

impl PreComputedAccountPool {
    pub fn empty(service_type: ServiceType) -> Self {
        Self {
            service_type,
            accounts: Vec::new(),
            last_update: chrono::Utc::now(),
            version: 0,
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.accounts.iter().filter(|a| a.is_healthy).count()
    }

    pub fn average_score(&self) -> f64 {
        if self.accounts.is_empty() {
            return 0.0;
        }
        self.accounts.iter().map(|a| a.score).sum::<f64>() / self.accounts.len() as f64
    }
}
