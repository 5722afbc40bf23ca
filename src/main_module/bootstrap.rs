use log::{info, warn};
use std::sync::Arc;

use crate::board::seed::SeedData;
use crate::board::store::{BoardStore, MemoryBoardStore};
use crate::board::stream::BoardEventBus;
use crate::board::views::{MemoryViewStore, ViewStore};
use crate::core::config::AppConfig;
use crate::core::shared::state::AppState;

/// Picks the stores: Postgres when compiled in and a database URL is set,
/// otherwise the in-memory stores, optionally seeded from a fixture file.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    #[cfg(feature = "postgres")]
    {
        if let Some(url) = config.database.url.clone() {
            return build_postgres_state(config, &url).await;
        }
    }

    if config.database.url.is_some() {
        warn!("database.url is set but this build has no postgres support; using memory stores");
    }

    let events = BoardEventBus::new(config.stream.max_connections());
    let store = Arc::new(MemoryBoardStore::with_events(events.clone()));
    if let Some(path) = config.board.seed_path.as_deref() {
        SeedData::from_path(path)?.load_into(&store).await;
    }
    info!("Using in-memory board and view stores");

    let store: Arc<dyn BoardStore> = store;
    let views: Arc<dyn ViewStore> = Arc::new(MemoryViewStore::new());
    Ok(AppState::with_events(store, views, events, config))
}

#[cfg(feature = "postgres")]
async fn build_postgres_state(config: AppConfig, url: &str) -> anyhow::Result<AppState> {
    use crate::board::store::PgBoardStore;
    use crate::board::views::PgViewStore;
    use crate::core::shared::utils::{create_conn, run_migrations};

    let url = url.to_string();
    let pool_size = config.database.pool_size;
    let pool = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let pool = create_conn(&url, pool_size)?;
        run_migrations(&pool).map_err(|e| anyhow::anyhow!(e))?;
        Ok(pool)
    })
    .await??;
    info!("Using Postgres board and view stores (pool size {pool_size})");

    let store: Arc<dyn BoardStore> = Arc::new(PgBoardStore::new(pool.clone()));
    let views: Arc<dyn ViewStore> = Arc::new(PgViewStore::new(pool));
    Ok(AppState::new(store, views, config))
}
