//! Load Balancer (C2): given a candidate set of accounts, pick one.
//!
//! Round-robin counters are atomic and keyed by `strategy + serviceType`,
//! in pgdog's `LoadBalancer` style (`round_robin: Arc<AtomicUsize>`,
//! `fetch_add(1, Ordering::Relaxed) % n`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::{Account, AccountId, ServiceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    LeastResponseTime,
    ConsistentHash,
}

impl Strategy {
    fn key_name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::LeastResponseTime => "least_response_time",
            Self::ConsistentHash => "consistent_hash",
        }
    }
}

/// Diagnostic-only score, never consulted by selection.
pub fn health_score(account: &Account) -> i32 {
    if !account.is_enabled {
        return 0;
    }
    let mut score: i32 = 100;
    score -= account.current_load as i32;
    if let Some(rt) = account.average_response_time_ms {
        if rt > 2000 {
            score -= 20;
        } else if rt > 1000 {
            score -= 10;
        }
    }
    if account.status != crate::domain::AccountStatus::Active {
        score -= 50;
    }
    score
}

/// FNV-1a over the request key, hand-rolled: small enough to not warrant
/// pulling in a hashing crate for one function.
fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub struct LoadBalancer {
    counters: std::sync::Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            counters: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn counter_for(&self, strategy: Strategy, service_type: ServiceType) -> Arc<AtomicUsize> {
        let key = format!("{}:{}", strategy.key_name(), service_type.id());
        let mut counters = self.counters.lock().unwrap();
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    /// Recommended strategy when the caller does not specify one.
    pub fn recommend(accounts: &[Account]) -> Strategy {
        if accounts.len() <= 2 {
            return Strategy::RoundRobin;
        }
        let loads: Vec<i32> = accounts.iter().map(|a| a.current_load as i32).collect();
        let (min, max) = (
            loads.iter().copied().min().unwrap_or(0),
            loads.iter().copied().max().unwrap_or(0),
        );
        if max - min > 30 {
            return Strategy::LeastConnections;
        }
        if accounts.iter().any(|a| a.weight != 1) {
            return Strategy::WeightedRoundRobin;
        }
        if accounts.iter().any(|a| a.average_response_time_ms.is_some()) {
            return Strategy::LeastResponseTime;
        }
        Strategy::LeastConnections
    }

    /// Sort by `priority` ascending (ties by `currentLoad` ascending) and
    /// return only the minimum-priority bucket: the strategy only picks
    /// among accounts sharing the best priority.
    pub fn apply_priority_ordering(mut accounts: Vec<Account>) -> Vec<Account> {
        // `None` sorts after any `Some` (`domain::Account::priority` doc),
        // so compare on `(i32::MAX, is_none)` keys rather than `Option`'s
        // default ordering, which would put `None` first.
        let sort_key = |a: &Account| a.priority.unwrap_or(i32::MAX);
        accounts.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)).then(a.current_load.cmp(&b.current_load)));
        let Some(min_key) = accounts.first().map(sort_key) else {
            return accounts;
        };
        accounts
            .into_iter()
            .take_while(|a| sort_key(a) == min_key)
            .collect()
    }

    /// Select one account under `strategy`. Returns `None` if no candidate
    /// survives the selection preconditions.
    pub fn select(
        &self,
        candidates: &[Account],
        strategy: Strategy,
        service_type: ServiceType,
        request_key: &str,
    ) -> Option<AccountId> {
        let eligible: Vec<&Account> = candidates.iter().filter(|a| a.is_selectable()).collect();
        if eligible.is_empty() {
            return None;
        }
        if eligible.len() == 1 {
            return Some(eligible[0].id);
        }

        match strategy {
            Strategy::RoundRobin => {
                let counter = self.counter_for(strategy, service_type);
                let idx = counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
                Some(eligible[idx].id)
            }
            Strategy::LeastConnections => eligible
                .iter()
                .min_by(|a, b| {
                    a.current_load
                        .cmp(&b.current_load)
                        .then(a.total_requests.cmp(&b.total_requests))
                })
                .map(|a| a.id),
            Strategy::WeightedRoundRobin => {
                let mut expanded: Vec<AccountId> = Vec::new();
                for account in &eligible {
                    for _ in 0..account.weight_or_default() {
                        expanded.push(account.id);
                    }
                }
                if expanded.is_empty() {
                    return None;
                }
                let counter = self.counter_for(strategy, service_type);
                let idx = counter.fetch_add(1, Ordering::Relaxed) % expanded.len();
                Some(expanded[idx])
            }
            Strategy::LeastResponseTime => eligible
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let score_a = weighted_response_time(a);
                    let score_b = weighted_response_time(b);
                    score_a
                        .partial_cmp(&score_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(_, a)| a.id),
            Strategy::ConsistentHash => {
                if request_key.is_empty() {
                    return self.select(
                        candidates,
                        Strategy::LeastConnections,
                        service_type,
                        request_key,
                    );
                }
                let idx = (fnv1a(request_key) as usize) % eligible.len();
                Some(eligible[idx].id)
            }
        }
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

fn weighted_response_time(account: &Account) -> f64 {
    let rt = account.average_response_time_ms.unwrap_or(0) as f64;
    rt * (1.0 + account.current_load as f64 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountStatus, AccountType};
    use std::collections::BTreeSet;

    fn account(load: u8) -> Account {
        Account {
            id: AccountId::new(),
            name: "a".into(),
            service_type: ServiceType::Claude,
            account_type: AccountType::Shared,
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
            total_cost: crate::domain::Money::ZERO,
            last_used_at: None,
            error_message: None,
        }
    }

    #[test]
    fn round_robin_cycles_through_all_candidates() {
        let lb = LoadBalancer::new();
        let accounts = vec![account(10), account(10), account(10)];
        let ids: Vec<_> = accounts.iter().map(|a| a.id).collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            let picked = lb
                .select(&accounts, Strategy::RoundRobin, ServiceType::Claude, "")
                .unwrap();
            assert!(ids.contains(&picked));
            seen.insert(picked);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn load_at_95_or_above_is_never_selectable() {
        let lb = LoadBalancer::new();
        let mut high = account(95);
        high.id = AccountId::new();
        let accounts = vec![high];
        assert_eq!(
            lb.select(&accounts, Strategy::LeastConnections, ServiceType::Claude, ""),
            None
        );
    }

    #[test]
    fn consistent_hash_is_stable_for_same_key() {
        let lb = LoadBalancer::new();
        let accounts = vec![account(10), account(20), account(30), account(40)];
        let first = lb.select(&accounts, Strategy::ConsistentHash, ServiceType::Claude, "user-42");
        let second = lb.select(&accounts, Strategy::ConsistentHash, ServiceType::Claude, "user-42");
        assert_eq!(first, second);
    }

    #[test]
    fn consistent_hash_falls_back_to_least_connections_on_empty_key() {
        let lb = LoadBalancer::new();
        let mut low = account(5);
        low.id = AccountId::new();
        let high = account(50);
        let accounts = vec![high, low.clone()];
        let picked = lb.select(&accounts, Strategy::ConsistentHash, ServiceType::Claude, "");
        assert_eq!(picked, Some(low.id));
    }

    #[test]
    fn weighted_round_robin_favors_higher_weight() {
        let lb = LoadBalancer::new();
        let mut heavy = account(10);
        heavy.weight = 3;
        let light = account(10);
        let accounts = vec![heavy.clone(), light.clone()];
        let mut counts: HashMap<AccountId, u32> = HashMap::new();
        for _ in 0..40 {
            let picked = lb
                .select(&accounts, Strategy::WeightedRoundRobin, ServiceType::Claude, "")
                .unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }
        assert!(counts[&heavy.id] > counts[&light.id]);
    }

    #[test]
    fn recommend_prefers_round_robin_for_small_pools() {
        let accounts = vec![account(10), account(10)];
        assert!(matches!(LoadBalancer::recommend(&accounts), Strategy::RoundRobin));
    }

    #[test]
    fn recommend_prefers_least_connections_on_wide_load_spread() {
        let accounts = vec![account(5), account(10), account(90)];
        assert!(matches!(
            LoadBalancer::recommend(&accounts),
            Strategy::LeastConnections
        ));
    }
}
