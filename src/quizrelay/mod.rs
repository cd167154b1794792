pub mod cache;
pub mod config;
pub mod hub;
pub mod leaderboard;
pub mod net;
pub mod registry;
pub mod service;
pub mod types;

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::store::{CacheStore, InMemoryCache, InMemoryLedger, LedgerStore, RedisCache};
use cache::CacheLayer;
use config::{CacheBackend, ServerConfig};
use leaderboard::LeaderboardAssembler;
use net::server::{run_server, AppState};
use registry::HubRegistry;
use service::QuizService;

/// Wires stores, cache layer, hubs and service together from the config
pub async fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let cache_store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => {
            info!("Using in-process cache store");
            Arc::new(InMemoryCache::new())
        }
        CacheBackend::Redis => {
            info!("Connecting to Redis cache at {}", config.cache.redis_url);
            Arc::new(RedisCache::connect(&config.cache.redis_url).await?)
        }
    };
    let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());

    let cache = CacheLayer::new(
        cache_store,
        ledger,
        LeaderboardAssembler::new(config.leaderboard.tie_break),
        &config.cache,
    );
    let hubs = HubRegistry::new(config.hub.clone());
    let service = QuizService::new(Arc::new(cache), Arc::new(hubs));

    Ok(Arc::new(AppState {
        service: Arc::new(service),
        session: config.session.clone(),
    }))
}

/// Starts the relay and serves until `shutdown` fires, then drains
/// background work and closes every viewer.
pub async fn init(config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let state = build_state(&config).await?;
    let service = state.service.clone();

    let result = run_server(&config.server.addr, state, shutdown).await;
    service.shutdown().await;
    result
}
