use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Block, TransactionReceipt};
use async_trait::async_trait;

use crate::chain::abi::{decode_log, decode_registry_lookup, registry_lookup_call};
use crate::chain::{ChainBlock, ChainSource, ContractRegistry, TxReceipt};

use super::rpc::{RpcClient, RpcError};

/// `ChainSource` backed by a JSON-RPC node. Receipt logs emitted by the
/// registered contracts are decoded into typed events; all other logs are
/// dropped.
pub struct RpcChainSource {
    client: RpcClient,
    registry: Arc<ContractRegistry>,
}

impl RpcChainSource {
    pub fn new(client: RpcClient, registry: Arc<ContractRegistry>) -> Self {
        Self { client, registry }
    }

    fn convert_block(block: Block) -> Result<ChainBlock, RpcError> {
        let number = i64::try_from(block.header.number)
            .map_err(|_| RpcError::Decode(format!("block number {}", block.header.number)))?;
        let timestamp = i64::try_from(block.header.timestamp)
            .map_err(|_| RpcError::Decode(format!("block timestamp {}", block.header.timestamp)))?;
        Ok(ChainBlock {
            number,
            hash: format!("{:?}", block.header.hash),
            parent_hash: format!("{:?}", block.header.parent_hash),
            timestamp,
            transactions: block
                .transactions
                .hashes()
                .map(|h| format!("{h:?}"))
                .collect(),
        })
    }

    fn convert_receipt(&self, receipt: TransactionReceipt) -> Result<TxReceipt, RpcError> {
        let mut events = Vec::new();
        for log in receipt.inner.logs() {
            let address = format!("{:?}", log.address());
            let Some(kind) = self.registry.kind_of(&address) else {
                continue;
            };
            match decode_log(kind, log.data()) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {
                    tracing::debug!(
                        "Ignoring unknown {} log in tx {:?}",
                        kind,
                        receipt.transaction_hash
                    );
                }
                Err(e) => return Err(RpcError::Decode(e.to_string())),
            }
        }

        Ok(TxReceipt {
            tx_hash: format!("{:?}", receipt.transaction_hash),
            to: receipt.to.map(|to| format!("{:?}", to)),
            events,
        })
    }
}

fn parse_hash(hash: &str) -> Result<B256, RpcError> {
    B256::from_str(hash).map_err(|e| RpcError::InvalidInput(format!("{}: {}", hash, e)))
}

#[async_trait]
impl ChainSource for RpcChainSource {
    async fn latest_block_number(&self) -> Result<i64, RpcError> {
        let number = self.client.get_block_number().await?;
        i64::try_from(number).map_err(|_| RpcError::Decode(format!("block number {}", number)))
    }

    async fn block_by_number(&self, number: i64) -> Result<Option<ChainBlock>, RpcError> {
        let number = u64::try_from(number)
            .map_err(|_| RpcError::InvalidInput(format!("block number {}", number)))?;
        self.client
            .get_block_by_number(number)
            .await?
            .map(Self::convert_block)
            .transpose()
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<ChainBlock>, RpcError> {
        self.client
            .get_block_by_hash(parse_hash(hash)?)
            .await?
            .map(Self::convert_block)
            .transpose()
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, RpcError> {
        self.client
            .get_transaction_receipt(parse_hash(tx_hash)?)
            .await?
            .map(|r| self.convert_receipt(r))
            .transpose()
    }

    async fn registered_contract(
        &self,
        registry: &str,
        name: &str,
    ) -> Result<Option<String>, RpcError> {
        let registry = Address::from_str(registry)
            .map_err(|e| RpcError::InvalidInput(format!("{}: {}", registry, e)))?;
        let output = self
            .client
            .eth_call(registry, registry_lookup_call(name))
            .await?;
        decode_registry_lookup(&output).map_err(|e| RpcError::Decode(e.to_string()))
    }
}
