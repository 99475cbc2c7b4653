//! Poison-transaction recovery.
//!
//! A fatal indexing error is persisted to shared state together with the
//! number of identical occurrences. Once the error is confirmed, the next
//! pass over the failing block drops the offending transaction (or the whole
//! block, for commit failures) and logs a network-level skip.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chain::ChainBlock;
use crate::db::StoreTransaction;
use crate::models::{SkipLevel, SkippedTransaction};
use crate::state::keys::INDEXING_ERROR;
use crate::state::SharedState;

use super::context::IndexerContext;
use super::error::{IndexerError, IndexingError};
use super::partition::SkipDirective;

/// Decides whether a recorded failure is safe to skip past.
#[async_trait]
pub trait ErrorConsensus: Send + Sync {
    async fn confirm(&self, error: &IndexingError) -> bool;
}

/// Confirms a failure once it has been seen `required` times in a row.
#[derive(Debug, Clone, Copy)]
pub struct RepeatThreshold {
    required: u32,
}

impl RepeatThreshold {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
        }
    }
}

#[async_trait]
impl ErrorConsensus for RepeatThreshold {
    async fn confirm(&self, error: &IndexingError) -> bool {
        error.count >= self.required
    }
}

/// The persisted error record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredError {
    #[serde(flatten)]
    pub error: IndexingError,
    #[serde(default)]
    pub has_consensus: bool,
}

pub async fn load_error(state: &dyn SharedState) -> Result<Option<StoredError>, IndexerError> {
    let Some(raw) = state.get(INDEXING_ERROR).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(stored) => Ok(Some(stored)),
        Err(e) => {
            tracing::warn!("Ignoring unreadable indexing error record: {}", e);
            Ok(None)
        }
    }
}

pub async fn clear_error(state: &dyn SharedState) -> Result<(), IndexerError> {
    state.delete(&[INDEXING_ERROR.to_string()]).await?;
    Ok(())
}

/// Persist `error`, counting consecutive repeats of the same failure, and
/// ask the consensus check whether it is now confirmed.
pub async fn record_error(
    ctx: &IndexerContext,
    mut error: IndexingError,
) -> Result<StoredError, IndexerError> {
    if let Some(previous) = load_error(ctx.state.as_ref()).await? {
        if previous.error.same_failure(&error) {
            error.count = previous.error.count.saturating_add(1);
        }
    }
    let has_consensus = ctx.consensus.confirm(&error).await;
    let stored = StoredError {
        error,
        has_consensus,
    };
    ctx.state
        .set(INDEXING_ERROR, &serde_json::to_string(&stored)?, None)
        .await?;

    tracing::error!(
        "{} (seen {} time(s), confirmed: {})",
        stored.error,
        stored.error.count,
        stored.has_consensus
    );
    Ok(stored)
}

/// What to drop from `block`, writing the network-level skip row inside
/// `tx` when something is dropped.
pub async fn resolve_skip(
    ctx: &IndexerContext,
    tx: &dyn StoreTransaction,
    block: &ChainBlock,
) -> Result<SkipDirective, IndexerError> {
    let Some(stored) = load_error(ctx.state.as_ref()).await? else {
        return Ok(SkipDirective::None);
    };
    if !stored.has_consensus || stored.error.blockhash != block.hash {
        return Ok(SkipDirective::None);
    }

    let max = ctx.config.skip_policy.max_skipped_tx;
    let skipped = SkippedTransaction::count(tx, SkipLevel::Network).await?;
    if skipped as i64 >= max {
        return Err(IndexerError::SkipLimitReached {
            max,
            txhash: stored.error.txhash,
        });
    }

    SkippedTransaction {
        blocknumber: block.number,
        blockhash: block.hash.clone(),
        txhash: stored.error.txhash.clone(),
        level: SkipLevel::Network,
    }
    .record(tx)
    .await?;

    // Failures not attributed to a single transaction poison the whole block.
    if stored.error.is_commit() || stored.error.txhash.is_empty() {
        tracing::warn!(
            "Skipping every transaction of block {} after confirmed {}",
            block.number,
            stored.error.stage
        );
        Ok(SkipDirective::WholeBlock)
    } else {
        tracing::warn!(
            "Skipping transaction {} of block {} after confirmed {}",
            stored.error.txhash,
            block.number,
            stored.error.stage
        );
        Ok(SkipDirective::Transaction(stored.error.txhash))
    }
}
