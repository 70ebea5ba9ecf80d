//! Roomcast API server entry point

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use roomcast_api::auth::SessionAuthenticator;
use roomcast_api::broker::coordinator::DeliveryCoordinator;
use roomcast_api::broker::multiplexer::RoomMultiplexer;
use roomcast_api::broker::pubsub::{MemoryPubSubLayer, PubSubLayer, RedisPubSubLayer};
use roomcast_api::broker::registry::ConnectionRegistry;
use roomcast_api::broker::store::PgMessageStore;
use roomcast_api::config::PubSubBackend;
use roomcast_api::{routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = roomcast_shared::db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    roomcast_shared::db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    // The shared pub/sub layer is built once at startup and injected into
    // the multiplexer; it is never reached through a global
    let (pubsub_layer, redis): (Arc<dyn PubSubLayer>, _) = match config.pubsub_backend {
        PubSubBackend::Redis => {
            let client = redis::Client::open(config.redis_url.as_str())
                .context("invalid REDIS_URL")?;
            let publisher = client
                .get_connection_manager()
                .await
                .context("failed to connect to redis")?;
            tracing::info!(url = %config.redis_url, "Using redis pub/sub layer");
            (
                Arc::new(RedisPubSubLayer::new(client, publisher.clone())),
                Some(publisher),
            )
        }
        PubSubBackend::Memory => {
            tracing::info!("Using in-process pub/sub layer (single-node mode)");
            (Arc::new(MemoryPubSubLayer::new()), None)
        }
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let multiplexer = RoomMultiplexer::new(pubsub_layer, Arc::clone(&registry));
    let store = Arc::new(PgMessageStore::new(pool.clone()));
    let authenticator = Arc::new(SessionAuthenticator::new(pool.clone()));
    let broker = Arc::new(DeliveryCoordinator::new(
        registry,
        multiplexer,
        store.clone(),
        authenticator.clone(),
    ));

    let bind_address = config.bind_address.clone();
    let state = AppState {
        config: Arc::new(config),
        pool,
        broker,
        store,
        authenticator,
        redis,
    };

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "roomcast-api listening");
    axum::serve(listener, app).await.context("server exited")?;

    Ok(())
}
