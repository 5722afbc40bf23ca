use std::sync::Arc;

use crate::board::store::BoardStore;
use crate::board::stream::BoardEventBus;
use crate::board::views::ViewStore;
use crate::core::config::AppConfig;

/// Shared handles for every request. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BoardStore>,
    pub views: Arc<dyn ViewStore>,
    pub events: BoardEventBus,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn BoardStore>, views: Arc<dyn ViewStore>, config: AppConfig) -> Self {
        let events = BoardEventBus::new(config.stream.max_connections());
        Self::with_events(store, views, events, config)
    }

    /// State around an existing bus, for stores that publish to it.
    pub fn with_events(
        store: Arc<dyn BoardStore>,
        views: Arc<dyn ViewStore>,
        events: BoardEventBus,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            views,
            events,
            config: Arc::new(config),
        }
    }
}
