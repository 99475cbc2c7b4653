use std::sync::Arc;

use crate::chain::{ChainSource, ContractRegistry, REPLICA_SET_MANAGER_NAME};
use crate::db::Store;
use crate::metadata::MetadataClient;
use crate::state::SharedState;
use crate::types::config::IndexerConfig;

use super::signatures::WalletVerifiers;
use super::skip::{ErrorConsensus, RepeatThreshold};

/// Everything an indexing pass needs, built once at startup and passed by
/// reference.
#[derive(Clone)]
pub struct IndexerContext {
    pub store: Arc<dyn Store>,
    pub chain: Arc<dyn ChainSource>,
    pub metadata: Arc<dyn MetadataClient>,
    pub state: Arc<dyn SharedState>,
    pub registry: Arc<ContractRegistry>,
    pub verifiers: WalletVerifiers,
    pub consensus: Arc<dyn ErrorConsensus>,
    pub config: IndexerConfig,
}

impl IndexerContext {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainSource>,
        metadata: Arc<dyn MetadataClient>,
        state: Arc<dyn SharedState>,
        config: IndexerConfig,
    ) -> Self {
        let registry = Arc::new(ContractRegistry::new(&config.contracts));
        let consensus = Arc::new(RepeatThreshold::new(
            config.skip_policy.confirmations_required,
        ));
        Self {
            store,
            chain,
            metadata,
            state,
            registry,
            verifiers: WalletVerifiers::default(),
            consensus,
            config,
        }
    }

    pub fn with_verifiers(mut self, verifiers: WalletVerifiers) -> Self {
        self.verifiers = verifiers;
        self
    }

    pub fn with_consensus(mut self, consensus: Arc<dyn ErrorConsensus>) -> Self {
        self.consensus = consensus;
        self
    }

    /// Share `registry` with the chain source so both see discovered
    /// contracts.
    pub fn with_registry(mut self, registry: Arc<ContractRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Look the replica set manager up in the on-chain registry while its
    /// address is still unknown. Failures are logged and retried on the next
    /// block.
    pub async fn resolve_replica_set_manager(&self) {
        let Some(registry) = self.config.contracts.registry.as_deref() else {
            return;
        };
        if !self.registry.needs_replica_set_manager() {
            return;
        }
        match self
            .chain
            .registered_contract(registry, REPLICA_SET_MANAGER_NAME)
            .await
        {
            Ok(Some(address)) => {
                if self.registry.discover_replica_set_manager(&address) {
                    tracing::info!("Found user replica set manager at {}", address);
                }
            }
            Ok(None) => tracing::debug!("User replica set manager not registered yet"),
            Err(e) => tracing::warn!("Replica set manager lookup failed: {}", e),
        }
    }
}
