//! Short-lived exclusive locks on top of the shared store
//!
//! Each acquisition writes a random token; release is a compare-and-delete on
//! that token so a holder whose lock already expired never frees someone
//! else's lock.

use std::sync::Arc;
use std::time::Duration;

use orchestrator_domain::KeyValueStore;
use orchestrator_errors::OrchestratorResult;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct StoreLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
}

impl StoreLock {
    /// Returns `None` when another holder owns the lock.
    pub async fn try_acquire(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> OrchestratorResult<Option<Self>> {
        let key = key.into();
        let token = Uuid::new_v4().to_string();
        if store.set_if_absent(&key, token.as_bytes(), Some(ttl)).await? {
            debug!("Acquired lock {}", key);
            Ok(Some(Self { store, key, token }))
        } else {
            Ok(None)
        }
    }

    /// Returns whether the lock was still held by this token.
    pub async fn release(self) -> bool {
        match self
            .store
            .delete_if_equals(&self.key, self.token.as_bytes())
            .await
        {
            Ok(released) => {
                if !released {
                    warn!("Lock {} expired before release", self.key);
                }
                released
            }
            Err(e) => {
                warn!("Failed to release lock {}: {}", self.key, e);
                false
            }
        }
    }
}
