//! # Carpool Router
//!
//! Routing core for a multi-tenant AI-service gateway. Carpool groups share
//! or dedicate provider accounts (Claude, Gemini, OpenAI, Qwen); this crate
//! enforces per-group quota, resolves a group's resource binding down to a
//! concrete candidate set, balances load across that set, and keeps a
//! background picture of account health so routing decisions never block on
//! a live probe.
//!
//! ## Modules
//! - `domain`: core entity types (`Account`, `Group`, `ResourceBinding`, ...)
//! - `error`: the Router's error taxonomy
//! - `config`: environment-driven configuration
//! - `cache`: `KvCache` trait and in-memory implementation, used for the
//!   precomputed account pool
//! - `persistence`: `DataService` trait plus in-memory and SQLite backends
//! - `provider_client`: outbound calls to backend AI providers
//! - `quota`: Quota Gate (C1)
//! - `load_balancer`: Load Balancer (C2)
//! - `resolver`: Resource Binding Resolver (C3)
//! - `pool_manager`: Pool Manager (C4), the background health/scoring loop
//! - `router`: Smart Router (C5), request orchestration and retry
//! - `api`: thin HTTP surface over the above

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod load_balancer;
pub mod persistence;
pub mod pool_manager;
pub mod provider_client;
pub mod quota;
pub mod resolver;
pub mod router;

pub use config::Config;
