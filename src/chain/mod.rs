//! Chain-facing types: blocks, receipts and the decoded contract events they
//! carry.

pub mod abi;
pub mod contracts;
pub mod events;

use async_trait::async_trait;

use crate::rpc::RpcError;

pub use contracts::{ContractKind, ContractRegistry, REPLICA_SET_MANAGER_NAME, ZERO_ADDRESS};
pub use events::{
    ContractEvent, Multihash, PlaylistEvent, ReplicaSetEvent, SocialEvent, TrackEvent, UserEvent,
    UserLibraryEvent,
};

/// Parent hash reported for the first block of a chain.
pub const ZERO_BLOCK_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq)]
pub struct ChainBlock {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Transaction hashes in block order.
    pub transactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: String,
    /// Destination address, lowercased. `None` for contract creations.
    pub to: Option<String>,
    /// Decoded events from indexed contracts, in log order.
    pub events: Vec<ContractEvent>,
}

/// Read access to the chain node.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn latest_block_number(&self) -> Result<i64, RpcError>;

    async fn block_by_number(&self, number: i64) -> Result<Option<ChainBlock>, RpcError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<ChainBlock>, RpcError>;

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, RpcError>;

    /// Address stored under `name` in the on-chain contract registry at
    /// `registry`. `None` while nothing is registered.
    async fn registered_contract(
        &self,
        registry: &str,
        name: &str,
    ) -> Result<Option<String>, RpcError>;
}
