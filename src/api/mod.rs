//! HTTP API for the routing core.
//!
//! ## Endpoints
//!
//! - `POST /v1/route` - route a request for a group through the core
//! - `GET /v1/pools` - status of every service type's precomputed pool
//! - `GET /v1/pools/:service_type` - status of a single service type's pool
//! - `POST /v1/pools/:service_type/health-check` - trigger an immediate health check
//! - `GET /v1/accounts/:id/health` - last known health for one account

mod routes;

pub use routes::{serve, AppState};
