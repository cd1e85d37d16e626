//! Shared key-value store construction

pub mod lock;
pub mod memory;
pub mod redis_store;

use std::sync::Arc;

use orchestrator_core::{StoreBackend, StoreConfig};
use orchestrator_domain::KeyValueStore;
use orchestrator_errors::OrchestratorResult;
use tracing::info;

pub use lock::StoreLock;
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// Opens the configured backend. The caller owns the handle and must call
/// `close` on shutdown.
pub async fn open_store(config: &StoreConfig) -> OrchestratorResult<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Redis => Arc::new(RedisStore::connect(config).await?),
    };
    info!("Opened {} store", store.backend());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store(&StoreConfig::default()).await.unwrap();
        assert_eq!(store.backend(), "memory");
        assert!(store.health_check().await.unwrap());
        store.close().await.unwrap();
    }
}
