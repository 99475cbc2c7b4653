use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::types::config::ContractAddresses;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Registry key of the replica set manager contract.
pub const REPLICA_SET_MANAGER_NAME: &str = "UserReplicaSetManager";

/// The indexed contracts. Each one owns a transaction bucket in the block
/// processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContractKind {
    User,
    Track,
    Social,
    Playlist,
    UserLibrary,
    ReplicaSet,
}

impl ContractKind {
    pub const ALL: [ContractKind; 6] = [
        ContractKind::User,
        ContractKind::Track,
        ContractKind::Social,
        ContractKind::Playlist,
        ContractKind::UserLibrary,
        ContractKind::ReplicaSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::User => "user_factory",
            ContractKind::Track => "track_factory",
            ContractKind::Social => "social_feature_factory",
            ContractKind::Playlist => "playlist_factory",
            ContractKind::UserLibrary => "user_library_factory",
            ContractKind::ReplicaSet => "user_replica_set_manager",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup from a lowercased contract address to the contract it belongs to.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    by_address: HashMap<String, ContractKind>,
    /// Replica set manager address found on chain after startup.
    discovered_replica_set: OnceLock<String>,
}

impl ContractRegistry {
    pub fn new(addresses: &ContractAddresses) -> Self {
        let mut registry = Self::default();
        let entries = [
            (ContractKind::User, &addresses.user_factory),
            (ContractKind::Track, &addresses.track_factory),
            (ContractKind::Social, &addresses.social_feature_factory),
            (ContractKind::Playlist, &addresses.playlist_factory),
            (ContractKind::UserLibrary, &addresses.user_library_factory),
            (ContractKind::ReplicaSet, &addresses.user_replica_set_manager),
        ];
        for (kind, address) in entries {
            if let Some(address) = address {
                registry.insert(kind, address);
            }
        }
        registry
    }

    pub fn insert(&mut self, kind: ContractKind, address: &str) {
        let address = address.to_lowercase();
        if address == ZERO_ADDRESS {
            return;
        }
        self.by_address.insert(address, kind);
    }

    /// Zero-address and unknown destinations resolve to `None`.
    pub fn kind_of(&self, address: &str) -> Option<ContractKind> {
        let address = address.to_lowercase();
        if let Some(kind) = self.by_address.get(&address) {
            return Some(*kind);
        }
        (self.discovered_replica_set.get() == Some(&address)).then_some(ContractKind::ReplicaSet)
    }

    pub fn needs_replica_set_manager(&self) -> bool {
        self.discovered_replica_set.get().is_none()
            && !self
                .by_address
                .values()
                .any(|kind| *kind == ContractKind::ReplicaSet)
    }

    /// Record the replica set manager address. Returns false for the zero
    /// address or when one is already known.
    pub fn discover_replica_set_manager(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        if address == ZERO_ADDRESS || !self.needs_replica_set_manager() {
            return false;
        }
        self.discovered_replica_set.set(address).is_ok()
    }

    pub fn len(&self) -> usize {
        self.by_address.len() + usize::from(self.discovered_replica_set.get().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_matches_case_insensitively() {
        let mut registry = ContractRegistry::default();
        registry.insert(ContractKind::User, "0xABCDEF0000000000000000000000000000000001");

        assert_eq!(
            registry.kind_of("0xabcdef0000000000000000000000000000000001"),
            Some(ContractKind::User)
        );
        assert_eq!(registry.kind_of("0x1234"), None);
    }

    #[test]
    fn test_registry_ignores_zero_address() {
        let mut registry = ContractRegistry::default();
        registry.insert(ContractKind::Track, ZERO_ADDRESS);
        assert!(registry.is_empty());
        assert_eq!(registry.kind_of(ZERO_ADDRESS), None);
    }

    #[test]
    fn test_replica_set_manager_discovered_once() {
        let registry = ContractRegistry::new(&ContractAddresses {
            user_replica_set_manager: Some(ZERO_ADDRESS.to_string()),
            ..Default::default()
        });
        assert!(registry.needs_replica_set_manager());
        assert!(!registry.discover_replica_set_manager(ZERO_ADDRESS));

        let manager = "0x00000000000000000000000000000000000000AB";
        assert!(registry.discover_replica_set_manager(manager));
        assert!(!registry.needs_replica_set_manager());
        assert_eq!(registry.kind_of(manager), Some(ContractKind::ReplicaSet));
        assert!(!registry.discover_replica_set_manager("0x00000000000000000000000000000000000000cd"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_configured_replica_set_manager_needs_no_lookup() {
        let registry = ContractRegistry::new(&ContractAddresses {
            user_replica_set_manager: Some("0x0000000000000000000000000000000000000016".to_string()),
            ..Default::default()
        });
        assert!(!registry.needs_replica_set_manager());
    }
}
