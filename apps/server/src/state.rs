use std::sync::Arc;

use crate::config::ServerConfig;
use crate::store::MemoryStore;

/// Shared application state passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(config.key_rotation_days)),
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_one_store() {
        let state = AppState::new(ServerConfig::default());
        let clone = state.clone();
        assert!(Arc::ptr_eq(&state.store, &clone.store));
    }
}
