use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use game_recommender::{
    config::Config,
    db::{create_pool, create_redis_client, Cache, CachedFeatureStore, PgStore},
    routes::create_router,
    services::{
        providers::SteamClient,
        recommendations::{spawn_refresh_task, RecommendationEngine},
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("game_recommender=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client).await;

    let steam = Arc::new(SteamClient::new(
        config.steam_api_key.clone(),
        config.steam_api_url.clone(),
        config.upstream_retry_policy(),
    ));
    let store = PgStore::new(pool, steam);
    let features = Arc::new(CachedFeatureStore::new(
        store.clone(),
        cache.clone(),
        config.model_cache_ttl(),
    ));

    let engine = Arc::new(
        RecommendationEngine::new(features, Arc::new(store), config.engine_config()?)
            .with_model_persistence(cache, config.model_cache_ttl()),
    );

    let refresh_task = spawn_refresh_task(
        engine.clone(),
        config.refresh_interval(),
        config.refresh_retry(),
    );

    let app = create_router(AppState::new(engine, config.max_recommendations));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh_task.shutdown().await;
    cache_writer.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
