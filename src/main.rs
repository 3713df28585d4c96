//! Carpool Router - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the routing core.

use std::sync::Arc;

use carpool_router::api::{self, AppState};
use carpool_router::cache::{InMemoryKvCache, KvCache};
use carpool_router::config::Config;
use carpool_router::domain::{PreComputedAccountPool, ServiceType};
use carpool_router::persistence::{DataService, InMemoryDataService, SqliteDataService};
use carpool_router::pool_manager::PoolManager;
use carpool_router::provider_client::{HttpProviderClient, ProviderRegistry};
use carpool_router::resolver::Resolver;
use carpool_router::router::Router;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn provider_base_url(service_type: ServiceType) -> String {
    let env_key = format!("{}_BASE_URL", service_type.id().to_uppercase());
    std::env::var(&env_key).unwrap_or_else(|_| match service_type {
        ServiceType::Claude => "https://api.anthropic.com".to_string(),
        ServiceType::Gemini => "https://generativelanguage.googleapis.com".to_string(),
        ServiceType::Openai => "https://api.openai.com".to_string(),
        ServiceType::Qwen => "https://dashscope.aliyuncs.com".to_string(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carpool_router=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(host = %config.host, port = config.port, "loaded configuration");

    let data: Arc<dyn DataService> = match std::env::var("DATABASE_PATH") {
        Ok(path) => {
            info!(path, "opening sqlite data service");
            Arc::new(SqliteDataService::open(path.into()).await?)
        }
        Err(_) => {
            info!("DATABASE_PATH not set, using in-memory data service");
            Arc::new(InMemoryDataService::new())
        }
    };

    let mut registry = ProviderRegistry::new();
    for service_type in [
        ServiceType::Claude,
        ServiceType::Gemini,
        ServiceType::Openai,
        ServiceType::Qwen,
    ] {
        registry.register(Arc::new(HttpProviderClient::new(
            service_type,
            provider_base_url(service_type),
        )));
    }
    let providers = Arc::new(registry);

    let pool_cache: Arc<dyn KvCache<Arc<PreComputedAccountPool>>> =
        Arc::new(InMemoryKvCache::new());

    let pool_manager = Arc::new(PoolManager::new(
        Arc::clone(&data),
        Arc::clone(&providers),
        Arc::clone(&pool_cache),
        config.clone(),
    ));
    pool_manager.start().await;

    let resolver = Resolver::new(
        Arc::clone(&data),
        Arc::clone(&providers),
        Arc::clone(&pool_cache),
        config.health_check_timeout,
    );
    let router = Router::new(Arc::clone(&data), Arc::clone(&providers), resolver, config.clone());

    let state = Arc::new(AppState {
        router,
        pool_manager,
        data,
        config,
    });

    info!("starting routing core HTTP server");
    api::serve(state).await?;

    Ok(())
}
