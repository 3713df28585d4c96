use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router as AxumRouter,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domain::{GroupId, ServiceType, UserId};
use crate::error::RouterError;
use crate::persistence::DataService;
use crate::pool_manager::PoolManager;
use crate::router::{RouteRequest, Router as CoreRouter};

pub struct AppState {
    pub router: CoreRouter,
    pub pool_manager: Arc<PoolManager>,
    pub data: Arc<dyn DataService>,
    pub config: Config,
}

/// Start the HTTP server.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let host = state.config.host.clone();
    let port = state.config.port;

    let app = AxumRouter::new()
        .route("/v1/route", post(route_request))
        .route("/v1/pools", get(list_pools))
        .route("/v1/pools/:service_type", get(get_pool))
        .route(
            "/v1/pools/:service_type/health-check",
            post(trigger_health_check),
        )
        .route("/v1/accounts/:id/health", get(account_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("routing core listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouteMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RouteHttpRequest {
    group_id: uuid::Uuid,
    user_id: Option<uuid::Uuid>,
    messages: Vec<RouteMessage>,
    #[serde(default)]
    service_type: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    request_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AccountUsedResponse {
    id: String,
    name: String,
    service_type: String,
}

#[derive(Debug, Serialize)]
struct UsageResponse {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct RouteHttpResponse {
    message: RouteMessage,
    usage: UsageResponse,
    cost: f64,
    account_used: AccountUsedResponse,
}

async fn route_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RouteHttpRequest>,
) -> Result<Json<RouteHttpResponse>, (StatusCode, Json<serde_json::Value>)> {
    let service_type = req
        .service_type
        .as_deref()
        .and_then(ServiceType::from_id)
        .unwrap_or_default();

    let prompt = req
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let result = state
        .router
        .route(RouteRequest {
            user_id: req.user_id.map(UserId),
            group_id: GroupId(req.group_id),
            service_type,
            model: req.model.unwrap_or_else(|| "default".to_string()),
            prompt,
            max_tokens: req.max_tokens,
            request_key: req.request_key.unwrap_or_default(),
            strategy: None,
        })
        .await
        .map_err(router_error_response)?;

    let account = state
        .data
        .get_account(result.account_id)
        .await
        .ok()
        .flatten();

    Ok(Json(RouteHttpResponse {
        message: RouteMessage {
            role: "assistant".to_string(),
            content: result.response.body,
        },
        usage: UsageResponse {
            prompt_tokens: result.response.request_tokens,
            completion_tokens: result.response.response_tokens,
            total_tokens: result.response.request_tokens + result.response.response_tokens,
        },
        cost: result.response.cost.as_dollars(),
        account_used: AccountUsedResponse {
            id: result.account_id.to_string(),
            name: account.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
            service_type: service_type.id().to_string(),
        },
    }))
}

fn router_error_response(error: RouterError) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(error.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(serde_json::json!({
            "error": format!("{:?}", error.kind()),
            "message": error.to_string(),
        })),
    )
}

#[derive(Debug, Serialize)]
struct PoolStatusResponse {
    service_type: String,
    pool_size: usize,
    healthy_count: usize,
    last_update: chrono::DateTime<chrono::Utc>,
    avg_score: f64,
}

async fn list_pools(State(state): State<Arc<AppState>>) -> Json<Vec<PoolStatusResponse>> {
    let status = state.pool_manager.get_status().await;
    Json(
        status
            .into_iter()
            .map(|(service_type, s)| PoolStatusResponse {
                service_type: service_type.id().to_string(),
                pool_size: s.pool_size,
                healthy_count: s.healthy_count,
                last_update: s.last_update,
                avg_score: s.avg_score,
            })
            .collect(),
    )
}

async fn get_pool(
    State(state): State<Arc<AppState>>,
    AxumPath(service_type): AxumPath<String>,
) -> Result<Json<PoolStatusResponse>, (StatusCode, String)> {
    let service_type = ServiceType::from_id(&service_type)
        .ok_or((StatusCode::BAD_REQUEST, "unknown service type".to_string()))?;
    let status = state.pool_manager.get_status().await;
    let entry = status
        .get(&service_type)
        .ok_or((StatusCode::NOT_FOUND, "no pool for service type".to_string()))?;
    Ok(Json(PoolStatusResponse {
        service_type: service_type.id().to_string(),
        pool_size: entry.pool_size,
        healthy_count: entry.healthy_count,
        last_update: entry.last_update,
        avg_score: entry.avg_score,
    }))
}

async fn trigger_health_check(
    State(state): State<Arc<AppState>>,
    AxumPath(service_type): AxumPath<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let service_type = ServiceType::from_id(&service_type)
        .ok_or((StatusCode::BAD_REQUEST, "unknown service type".to_string()))?;
    state.pool_manager.trigger_health_check(Some(service_type)).await;
    Ok(Json(serde_json::json!({ "triggered": true })))
}

async fn account_health(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<uuid::Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let account = state
        .data
        .get_account(crate::domain::AccountId(id))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "account not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "id": account.id.to_string(),
        "status": format!("{:?}", account.status),
        "current_load": account.current_load,
        "is_enabled": account.is_enabled,
        "error_message": account.error_message,
    })))
}
