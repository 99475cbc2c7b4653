use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::ChainBlock;
use crate::db::DbError;
use crate::rpc::RpcError;
use crate::state::StateError;

/// Transaction hash recorded for failures at commit time.
pub const COMMIT_TX_HASH: &str = "commit";

/// Step of the per-block state machine an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "fetch_tx_receipts")]
    FetchReceipts,
    #[serde(rename = "partition_transactions")]
    Partition,
    #[serde(rename = "prefetch-cids")]
    PrefetchMetadata,
    #[serde(rename = "apply_entities")]
    ApplyEntities,
    #[serde(rename = "commit")]
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FetchReceipts => "fetch_tx_receipts",
            Stage::Partition => "partition_transactions",
            Stage::PrefetchMetadata => "prefetch-cids",
            Stage::ApplyEntities => "apply_entities",
            Stage::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal, block-scoped failure. Persisted to shared state so the skip
/// policy can neutralize the offending transaction on a later pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingError {
    pub stage: Stage,
    pub blocknumber: i64,
    pub blockhash: String,
    pub txhash: String,
    pub message: String,
    /// Identical failures seen so far, including this one.
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

impl IndexingError {
    pub fn new(
        stage: Stage,
        block: &ChainBlock,
        txhash: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            stage,
            blocknumber: block.number,
            blockhash: block.hash.clone(),
            txhash: txhash.into(),
            message: message.to_string(),
            count: 1,
        }
    }

    /// Same block, transaction and message: a repeat of the same failure.
    pub fn same_failure(&self, other: &IndexingError) -> bool {
        self.blocknumber == other.blocknumber
            && self.blockhash == other.blockhash
            && self.txhash == other.txhash
            && self.message == other.message
    }

    pub fn is_commit(&self) -> bool {
        self.txhash == COMMIT_TX_HASH
    }
}

impl fmt::Display for IndexingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at block {} ({}) tx {}: {}",
            self.stage, self.blocknumber, self.blockhash, self.txhash, self.message
        )
    }
}

impl std::error::Error for IndexingError {}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Chain error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Shared state error: {0}")]
    State(#[from] StateError),

    #[error("Refusing to revert {0} blocks in a single pass")]
    RevertLimitExceeded(usize),

    #[error("Skipped transaction limit of {max} reached; cannot skip {txhash}")]
    SkipLimitReached { max: i64, txhash: String },

    #[error("Chain is missing block {0}")]
    MissingBlock(String),

    #[error("Failed to encode indexing state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> ChainBlock {
        ChainBlock {
            number: 12,
            hash: "0xb12".to_string(),
            parent_hash: "0xb11".to_string(),
            timestamp: 0,
            transactions: vec![],
        }
    }

    #[test]
    fn test_indexing_error_serializes_stage_name() {
        let err = IndexingError::new(Stage::PrefetchMetadata, &block(), "0xt1", "timeout");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stage"], "prefetch-cids");
        assert_eq!(json["blocknumber"], 12);

        let back: IndexingError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_same_failure_ignores_count_and_stage() {
        let a = IndexingError::new(Stage::Commit, &block(), COMMIT_TX_HASH, "boom");
        let mut b = a.clone();
        b.count = 4;
        assert!(a.same_failure(&b));
        assert!(a.is_commit());

        let c = IndexingError::new(Stage::Commit, &block(), COMMIT_TX_HASH, "other");
        assert!(!a.same_failure(&c));
    }
}
