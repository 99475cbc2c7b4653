pub mod contract;
pub mod indexer;

pub use contract::ContractAddresses;
pub use indexer::{
    IndexerConfig, LockConfig, MetadataConfig, RpcSettings, SkipPolicyConfig,
};
