use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::state::{SharedState, StateError};
use crate::types::config::LockConfig;

const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Cluster-wide mutual exclusion for indexing passes. The lease bounds how
/// long a crashed holder can block others; release only removes the lock
/// if this holder's token is still the stored value.
pub struct IndexingLock {
    state: Arc<dyn SharedState>,
    key: String,
    token: String,
    lease: Duration,
}

impl IndexingLock {
    /// Try to take the lock, polling for up to the configured wait. Returns
    /// `None` on contention.
    pub async fn acquire(
        state: Arc<dyn SharedState>,
        config: &LockConfig,
    ) -> Result<Option<Self>, StateError> {
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + config.wait();

        loop {
            if state
                .set_if_absent(&config.key, &token, config.lease())
                .await?
            {
                tracing::debug!("Acquired {}", config.key);
                return Ok(Some(Self {
                    state,
                    key: config.key.clone(),
                    token,
                    lease: config.lease(),
                }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub async fn release(self) -> Result<(), StateError> {
        if !self.state.delete_if_equals(&self.key, &self.token).await? {
            tracing::warn!("{} expired before release", self.key);
        }
        Ok(())
    }
}
