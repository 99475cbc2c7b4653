use serde::Deserialize;

/// Addresses of the indexed contracts. A missing entry disables the
/// corresponding bucket.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractAddresses {
    #[serde(default)]
    pub user_factory: Option<String>,
    #[serde(default)]
    pub track_factory: Option<String>,
    #[serde(default)]
    pub social_feature_factory: Option<String>,
    #[serde(default)]
    pub playlist_factory: Option<String>,
    #[serde(default)]
    pub user_library_factory: Option<String>,
    /// Left unset or zero until deployed; then looked up in `registry`.
    #[serde(default)]
    pub user_replica_set_manager: Option<String>,
    /// On-chain registry holding the addresses of later deployments.
    #[serde(default)]
    pub registry: Option<String>,
}
