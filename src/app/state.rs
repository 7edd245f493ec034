//! Application state shared across routes and connection tasks

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::session::SessionStore;
use crate::store::{MemoryStore, PlayerStore, SupabaseClient, SupabaseStore};
use crate::translate::{HttpTranslator, PassthroughTranslator, Translator};
use crate::util::rate_limit::RateLimiter;
use crate::util::time::{Clock, SystemClock};
use crate::world::MapRegistry;
use crate::ws::broadcast::BroadcastHub;
use crate::ws::connection::ConnectionSet;

/// Shared application state.
///
/// Each table is owned here and handed out by `Arc`; nothing is global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn PlayerStore>,
    pub translator: Arc<dyn Translator>,
    pub maps: Arc<MapRegistry>,
    pub connections: Arc<ConnectionSet>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionStore>,
    pub hub: Arc<BroadcastHub>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build state with backends chosen from configuration
    pub fn new(config: Config, maps: MapRegistry) -> Self {
        let store: Arc<dyn PlayerStore> =
            match (&config.supabase_url, &config.supabase_service_role_key) {
                (Some(url), Some(key)) => {
                    info!(url = %url, "Using Supabase player store");
                    Arc::new(SupabaseStore::new(SupabaseClient::new(url, key)))
                }
                _ => {
                    info!("Supabase not configured, using in-memory player store");
                    Arc::new(MemoryStore::new())
                }
            };

        let translator: Arc<dyn Translator> = match &config.translation_url {
            Some(url) => {
                info!(url = %url, "Using HTTP translator");
                Arc::new(HttpTranslator::new(url))
            }
            None => Arc::new(PassthroughTranslator),
        };

        Self::with_backends(config, maps, store, translator, Arc::new(SystemClock))
    }

    pub fn with_backends(
        config: Config,
        maps: MapRegistry,
        store: Arc<dyn PlayerStore>,
        translator: Arc<dyn Translator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone()));

        Self {
            config: Arc::new(config),
            store,
            translator,
            maps: Arc::new(maps),
            connections: Arc::new(ConnectionSet::new()),
            rate_limiter,
            sessions: Arc::new(SessionStore::new()),
            hub: Arc::new(BroadcastHub::new()),
            clock,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_state {
    use super::*;
    use crate::util::time::ManualClock;
    use crate::world::maps::test_maps::map_with_walls;

    /// Clock start used by every test state
    pub const T0: i64 = 1_700_000_000_000;

    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub clock: Arc<ManualClock>,
    }

    /// State over a 20x20 "main" map and a 20x20 "a" map with a wall at
    /// column 5, row 4 of "main"
    pub fn test_app(config: Config) -> TestApp {
        let mut maps = MapRegistry::new();
        maps.insert(map_with_walls("main", 20, 20, &[(5, 4)]));
        maps.insert(map_with_walls("a", 20, 20, &[]));

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let state = AppState::with_backends(
            config,
            maps,
            store.clone(),
            Arc::new(PassthroughTranslator),
            clock.clone(),
        );
        TestApp {
            state,
            store,
            clock,
        }
    }
}
