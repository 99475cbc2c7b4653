//! Periodic indexing passes. Each pass runs under the cluster lock, finds
//! where the indexed chain and the node's chain agree, reverts anything
//! stored above that point and indexes forward towards the node's tip.

use crate::chain::{ChainBlock, ZERO_BLOCK_HASH};
use crate::db::{DbError, StoreTransaction};
use crate::models::BlockRow;
use crate::state::keys::{LATEST_CHAIN_BLOCK, LATEST_CHAIN_BLOCKHASH};

use super::block::{index_block, set_indexed_pointers, BlockOutcome};
use super::context::IndexerContext;
use super::error::IndexerError;
use super::lock::IndexingLock;
use super::revert::{revert_blocks, MAX_REVERT_BLOCKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another worker holds the indexing lock.
    Contended,
    Completed { reverted: usize, indexed: usize },
}

/// The stored chain diverges from the node at `fork`. Blocks to revert are
/// tip-first, blocks to index oldest-first.
#[derive(Debug)]
struct PassPlan {
    fork: String,
    revert: Vec<BlockRow>,
    index: Vec<ChainBlock>,
}

/// Seed the blocks table with the configured start block when it is empty,
/// and publish the indexed pointers for whatever is current.
pub async fn initialize_blocks_table(ctx: &IndexerContext) -> Result<(), IndexerError> {
    let tx = ctx.store.begin().await?;
    if !BlockRow::any_exists(tx.as_ref()).await? {
        let start = ctx.config.start_block_hash.as_str();
        let (parenthash, number) = if start == ZERO_BLOCK_HASH {
            (None, None)
        } else {
            let block = ctx
                .chain
                .block_by_hash(start)
                .await?
                .ok_or_else(|| IndexerError::MissingBlock(start.to_string()))?;
            (Some(block.parent_hash), Some(block.number))
        };
        BlockRow {
            blockhash: start.to_string(),
            parenthash,
            number,
            is_current: true,
        }
        .insert(tx.as_ref())
        .await?;
        tracing::info!("Seeded blocks table with start block {}", start);
    }
    let current = BlockRow::current(tx.as_ref()).await?;
    tx.commit().await?;

    if let Some(BlockRow {
        blockhash,
        number: Some(number),
        ..
    }) = current
    {
        set_indexed_pointers(ctx.state.as_ref(), number, &blockhash).await?;
    }
    Ok(())
}

/// One indexing pass under the lock. Contention is not an error.
pub async fn run_pass(ctx: &IndexerContext) -> Result<PassOutcome, IndexerError> {
    let Some(lock) = IndexingLock::acquire(ctx.state.clone(), &ctx.config.lock).await? else {
        tracing::info!("Indexing lock {} is held elsewhere, skipping pass", ctx.config.lock.key);
        return Ok(PassOutcome::Contended);
    };

    let result = index_pass(ctx).await;
    if let Err(e) = lock.release().await {
        tracing::warn!("Failed to release indexing lock: {}", e);
    }
    result
}

async fn index_pass(ctx: &IndexerContext) -> Result<PassOutcome, IndexerError> {
    let latest = latest_chain_block(ctx).await?;

    let tx = ctx.store.begin().await?;
    let plan = plan_pass(ctx, tx.as_ref(), &latest).await;
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Failed to release read transaction: {}", e);
    }
    let plan = plan?;

    let mut reverted = 0;
    if !plan.revert.is_empty() {
        tracing::warn!(
            "Chain diverged at {}, reverting {} indexed blocks",
            plan.fork,
            plan.revert.len()
        );
        let requested = plan.revert.len();
        reverted = revert_blocks(ctx, plan.revert).await?.blocks;
        if reverted < requested {
            // Truncated revert; the next pass continues from the new tip.
            return Ok(PassOutcome::Completed {
                reverted,
                indexed: 0,
            });
        }
    }

    let mut indexed = 0;
    for block in &plan.index {
        match index_block(ctx, block).await? {
            BlockOutcome::Indexed { .. } => indexed += 1,
            BlockOutcome::AlreadyIndexed => {}
        }
    }
    if indexed > 0 {
        tracing::info!(
            "Indexed {} blocks up to {}",
            indexed,
            plan.index.last().map_or(-1, |b| b.number)
        );
    }
    Ok(PassOutcome::Completed { reverted, indexed })
}

/// Read the node's tip and publish it for readers.
async fn latest_chain_block(ctx: &IndexerContext) -> Result<ChainBlock, IndexerError> {
    let number = ctx.chain.latest_block_number().await?;
    let block = ctx
        .chain
        .block_by_number(number)
        .await?
        .ok_or_else(|| IndexerError::MissingBlock(number.to_string()))?;

    let ttl = Some(ctx.config.interval());
    ctx.state
        .set(LATEST_CHAIN_BLOCK, &block.number.to_string(), ttl)
        .await?;
    ctx.state
        .set(LATEST_CHAIN_BLOCKHASH, &block.hash, ttl)
        .await?;
    Ok(block)
}

async fn plan_pass(
    ctx: &IndexerContext,
    tx: &dyn StoreTransaction,
    latest: &ChainBlock,
) -> Result<PassPlan, IndexerError> {
    let current = BlockRow::require_current(tx).await?;
    let current_number = current.number.unwrap_or(-1);
    let target_number = (current_number + ctx.config.block_processing_window).min(latest.number);

    let target = if target_number == latest.number {
        latest.clone()
    } else {
        fetch_block(ctx, target_number).await?
    };

    // Walk the node's chain back from the target until a stored hash.
    let mut index = Vec::new();
    let mut cursor = target;
    let fork = loop {
        if BlockRow::find(tx, &cursor.hash).await?.is_some() {
            break cursor.hash;
        }
        let parent = stored_parent(ctx, &cursor.parent_hash).to_string();
        index.push(cursor);
        if BlockRow::find(tx, &parent).await?.is_some() {
            break parent;
        }
        if index.len() > MAX_REVERT_BLOCKS + ctx.config.block_processing_window as usize {
            return Err(IndexerError::RevertLimitExceeded(index.len()));
        }
        cursor = ctx
            .chain
            .block_by_hash(&parent)
            .await?
            .ok_or_else(|| IndexerError::MissingBlock(parent.clone()))?;
    };
    index.reverse();

    let revert = stored_blocks_above(ctx, tx, current, &fork).await?;
    Ok(PassPlan {
        fork,
        revert,
        index,
    })
}

async fn fetch_block(ctx: &IndexerContext, number: i64) -> Result<ChainBlock, IndexerError> {
    ctx.chain
        .block_by_number(number)
        .await?
        .ok_or_else(|| IndexerError::MissingBlock(number.to_string()))
}

/// The first block of a chain reports the zero hash as its parent; that is
/// stored under the configured start hash.
fn stored_parent<'a>(ctx: &'a IndexerContext, parent: &'a str) -> &'a str {
    if parent == ZERO_BLOCK_HASH {
        ctx.config.start_block_hash.as_str()
    } else {
        parent
    }
}

/// Stored blocks from `current` down to (excluding) `fork`, tip-first.
/// Collection stops one past the revert limit so oversized reorgs still
/// fail on the limit rather than by walking the whole table.
async fn stored_blocks_above(
    ctx: &IndexerContext,
    tx: &dyn StoreTransaction,
    current: BlockRow,
    fork: &str,
) -> Result<Vec<BlockRow>, IndexerError> {
    let mut blocks = Vec::new();
    let mut row = current;
    while row.blockhash != fork && blocks.len() <= MAX_REVERT_BLOCKS {
        let Some(parent) = row.parenthash.clone() else {
            return Err(DbError::Corrupted(format!(
                "fork point {} is not an ancestor of the indexed chain",
                fork
            ))
            .into());
        };
        let parent = stored_parent(ctx, &parent).to_string();
        blocks.push(row);
        row = BlockRow::find(tx, &parent)
            .await?
            .ok_or_else(|| DbError::Corrupted(format!("parent block {} is not stored", parent)))?;
    }
    Ok(blocks)
}

/// Run passes on the configured interval until a pass fails fatally.
pub async fn run(ctx: IndexerContext) -> Result<(), IndexerError> {
    initialize_blocks_table(&ctx).await?;

    let mut ticker = tokio::time::interval(ctx.config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        "Indexing every {:?} with a window of {} blocks",
        ctx.config.interval(),
        ctx.config.block_processing_window
    );

    loop {
        ticker.tick().await;
        match run_pass(&ctx).await {
            Ok(PassOutcome::Completed { reverted, indexed }) if reverted + indexed > 0 => {
                tracing::debug!("Pass reverted {} and indexed {} blocks", reverted, indexed);
            }
            Ok(_) => {}
            Err(e @ (IndexerError::RevertLimitExceeded(_) | IndexerError::SkipLimitReached { .. })) => {
                tracing::error!("Stopping indexer: {}", e);
                return Err(e);
            }
            Err(e) => tracing::error!("Indexing pass failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::chain::{ContractEvent, Multihash, TxReceipt, UserEvent};
    use crate::db::{Store, WhereClause};
    use crate::indexer::signatures::{WalletSignatureVerifier, WalletVerifiers};
    use crate::indexer::skip::ErrorConsensus;
    use crate::indexer::IndexingError;
    use crate::indexer::context::testing::{config, harness, harness_with, Harness, USER_FACTORY};
    use crate::metadata::multihash_to_cid;
    use crate::models::{
        repo, AssociatedWallet, Entity, SkipLevel, SkippedTransaction, User, WalletChain,
    };
    use crate::state::keys::{MOST_RECENT_INDEXED_BLOCK, MOST_RECENT_INDEXED_BLOCKHASH};
    use crate::state::SharedState;

    fn user_tx(tx: &str, event: UserEvent) -> TxReceipt {
        TxReceipt {
            tx_hash: tx.to_string(),
            to: Some(USER_FACTORY.to_string()),
            events: vec![ContractEvent::User(event)],
        }
    }

    fn add_user(tx: &str, user_id: i64, handle: &str) -> TxReceipt {
        user_tx(
            tx,
            UserEvent::AddUser {
                user_id,
                handle: handle.to_string(),
                wallet: format!("0x{:040}", user_id),
            },
        )
    }

    fn rename(tx: &str, user_id: i64, name: &str) -> TxReceipt {
        user_tx(
            tx,
            UserEvent::UpdateName {
                user_id,
                name: name.to_string(),
            },
        )
    }

    fn current_blocks(h: &Harness) -> Vec<BlockRow> {
        h.store
            .rows(BlockRow::TABLE.name)
            .iter()
            .map(|r| BlockRow::from_record(r).unwrap())
            .filter(|b| b.is_current)
            .collect()
    }

    async fn user(h: &Harness, user_id: i64) -> Option<User> {
        let tx = h.store.begin().await.unwrap();
        repo::current(tx.as_ref(), User::key_for(user_id)).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_seeds_start_block_once() {
        let h = harness();
        initialize_blocks_table(&h.ctx).await.unwrap();
        initialize_blocks_table(&h.ctx).await.unwrap();

        let rows = h.store.rows(BlockRow::TABLE.name);
        assert_eq!(rows.len(), 1);
        let start = BlockRow::from_record(&rows[0]).unwrap();
        assert_eq!(start.blockhash, ZERO_BLOCK_HASH);
        assert_eq!(start.number, None);
        assert!(start.is_current);
        assert!(h.state.value(MOST_RECENT_INDEXED_BLOCK).is_none());
    }

    #[tokio::test]
    async fn test_pass_indexes_in_order_up_to_chain_tip() {
        let h = harness();
        initialize_blocks_table(&h.ctx).await.unwrap();
        h.chain.mine("0xb0", 100, vec![add_user("0xt0", 1, "ann")]);
        h.chain.mine("0xb1", 200, vec![rename("0xt1", 1, "Ann")]);
        h.chain.mine("0xb2", 300, vec![add_user("0xt2", 2, "ben")]);

        let outcome = run_pass(&h.ctx).await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                reverted: 0,
                indexed: 3
            }
        );

        let current = current_blocks(&h);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].blockhash, "0xb2");
        assert_eq!(user(&h, 1).await.unwrap().name.as_deref(), Some("Ann"));
        assert_eq!(h.state.writes_to(MOST_RECENT_INDEXED_BLOCK), vec!["0", "1", "2"]);
        assert_eq!(h.state.value(LATEST_CHAIN_BLOCKHASH).as_deref(), Some("0xb2"));
        assert_eq!(h.state.ttl(LATEST_CHAIN_BLOCK), Some(Duration::from_secs(1)));
        // Lock released.
        assert!(h.state.value(&h.ctx.config.lock.key).is_none());

        let idle = run_pass(&h.ctx).await.unwrap();
        assert_eq!(
            idle,
            PassOutcome::Completed {
                reverted: 0,
                indexed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_pass_is_bounded_by_window() {
        let mut cfg = config();
        cfg.block_processing_window = 2;
        let h = harness_with(cfg);
        initialize_blocks_table(&h.ctx).await.unwrap();
        for i in 0..5 {
            h.chain.mine(&format!("0xb{}", i), 100 * i, vec![]);
        }

        run_pass(&h.ctx).await.unwrap();
        assert_eq!(current_blocks(&h)[0].blockhash, "0xb1");
        run_pass(&h.ctx).await.unwrap();
        assert_eq!(current_blocks(&h)[0].blockhash, "0xb3");
        run_pass(&h.ctx).await.unwrap();
        assert_eq!(current_blocks(&h)[0].blockhash, "0xb4");
        assert_eq!(h.store.rows(BlockRow::TABLE.name).len(), 6);
    }

    #[tokio::test]
    async fn test_contended_pass_does_nothing() {
        let h = harness();
        initialize_blocks_table(&h.ctx).await.unwrap();
        h.chain.mine("0xb0", 100, vec![add_user("0xt0", 1, "ann")]);
        h.state
            .set_if_absent(&h.ctx.config.lock.key, "someone-else", Duration::from_secs(25))
            .await
            .unwrap();

        assert_eq!(run_pass(&h.ctx).await.unwrap(), PassOutcome::Contended);
        assert!(user(&h, 1).await.is_none());
        assert_eq!(
            h.state.value(&h.ctx.config.lock.key).as_deref(),
            Some("someone-else")
        );
    }

    #[tokio::test]
    async fn test_reorg_reverts_to_fork_and_follows_new_branch() {
        let h = harness();
        initialize_blocks_table(&h.ctx).await.unwrap();
        h.chain.mine("0xb0", 100, vec![add_user("0xt0", 1, "ann")]);
        h.chain.mine("0xb1", 200, vec![rename("0xt1", 1, "Old Branch")]);
        h.chain.mine("0xb2", 300, vec![add_user("0xt2", 2, "ben")]);
        run_pass(&h.ctx).await.unwrap();
        assert_eq!(user(&h, 1).await.unwrap().name.as_deref(), Some("Old Branch"));

        h.chain.truncate(1);
        h.chain.mine("0xc1", 210, vec![rename("0xt3", 1, "New Branch")]);
        h.chain.mine("0xc2", 310, vec![]);

        let outcome = run_pass(&h.ctx).await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                reverted: 2,
                indexed: 2
            }
        );
        assert_eq!(user(&h, 1).await.unwrap().name.as_deref(), Some("New Branch"));
        assert!(user(&h, 2).await.is_none());

        let hashes: Vec<String> = h
            .store
            .rows(BlockRow::TABLE.name)
            .iter()
            .map(|r| r.text("blockhash").unwrap())
            .collect();
        assert!(!hashes.contains(&"0xb1".to_string()));
        assert!(!hashes.contains(&"0xb2".to_string()));
        assert_eq!(current_blocks(&h)[0].blockhash, "0xc2");
        assert_eq!(
            h.state.value(MOST_RECENT_INDEXED_BLOCKHASH).as_deref(),
            Some("0xc2")
        );
    }

    #[tokio::test]
    async fn test_shorter_branch_is_reverted_without_new_blocks() {
        let h = harness();
        initialize_blocks_table(&h.ctx).await.unwrap();
        h.chain.mine("0xb0", 100, vec![add_user("0xt0", 1, "ann")]);
        h.chain.mine("0xb1", 200, vec![add_user("0xt1", 2, "ben")]);
        run_pass(&h.ctx).await.unwrap();

        h.chain.truncate(1);
        let outcome = run_pass(&h.ctx).await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                reverted: 1,
                indexed: 0
            }
        );
        assert!(user(&h, 2).await.is_none());
        assert_eq!(current_blocks(&h)[0].blockhash, "0xb0");
        assert_eq!(h.state.value(MOST_RECENT_INDEXED_BLOCK).as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_failing_transaction_is_skipped_after_confirmation() {
        let h = harness();
        initialize_blocks_table(&h.ctx).await.unwrap();
        let multihash = Multihash::sha256([9; 32]);
        h.metadata.fail(&multihash_to_cid(&multihash));
        h.chain.mine(
            "0xb0",
            100,
            vec![
                add_user("0xt1", 1, "ann"),
                user_tx("0xt2", UserEvent::UpdateMultihash { user_id: 1, multihash }),
            ],
        );

        // Two identical failures confirm the error.
        assert!(run_pass(&h.ctx).await.is_err());
        assert!(run_pass(&h.ctx).await.is_err());
        assert!(user(&h, 1).await.is_none());

        let outcome = run_pass(&h.ctx).await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                reverted: 0,
                indexed: 1
            }
        );
        assert_eq!(user(&h, 1).await.unwrap().handle.as_deref(), Some("ann"));

        let skipped = h.store.rows(SkippedTransaction::TABLE.name);
        assert_eq!(skipped.len(), 1);
        let row = SkippedTransaction::from_record(&skipped[0]).unwrap();
        assert_eq!(row.txhash, "0xt2");
        assert_eq!(row.level, SkipLevel::Network);
    }

    #[tokio::test]
    async fn test_skip_cap_stops_indexing() {
        let mut cfg = config();
        cfg.skip_policy.max_skipped_tx = 1;
        let h = harness_with(cfg);
        initialize_blocks_table(&h.ctx).await.unwrap();
        h.store.seed(
            SkippedTransaction::TABLE.name,
            SkippedTransaction {
                blocknumber: 0,
                blockhash: "0xold".to_string(),
                txhash: "0xold-tx".to_string(),
                level: SkipLevel::Network,
            }
            .to_record(),
        );
        let multihash = Multihash::sha256([9; 32]);
        h.metadata.fail(&multihash_to_cid(&multihash));
        h.chain.mine(
            "0xb0",
            100,
            vec![user_tx("0xt2", UserEvent::UpdateMultihash { user_id: 1, multihash })],
        );

        run_pass(&h.ctx).await.unwrap_err();
        run_pass(&h.ctx).await.unwrap_err();
        let err = run_pass(&h.ctx).await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::SkipLimitReached { max: 1, ref txhash } if txhash == "0xt2"
        ));
        assert_eq!(h.store.rows(SkippedTransaction::TABLE.name).len(), 1);
        assert_eq!(current_blocks(&h)[0].blockhash, ZERO_BLOCK_HASH);
    }

    struct NeverConfirm;

    #[async_trait]
    impl ErrorConsensus for NeverConfirm {
        async fn confirm(&self, _error: &IndexingError) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_unconfirmed_failure_is_never_skipped() {
        let mut h = harness();
        h.ctx = h.ctx.clone().with_consensus(Arc::new(NeverConfirm));
        initialize_blocks_table(&h.ctx).await.unwrap();
        let multihash = Multihash::sha256([9; 32]);
        h.metadata.fail(&multihash_to_cid(&multihash));
        h.chain.mine(
            "0xb0",
            100,
            vec![user_tx("0xt2", UserEvent::UpdateMultihash { user_id: 1, multihash })],
        );

        for _ in 0..4 {
            assert!(run_pass(&h.ctx).await.is_err());
        }
        assert!(h.store.rows(SkippedTransaction::TABLE.name).is_empty());
        assert_eq!(current_blocks(&h)[0].blockhash, ZERO_BLOCK_HASH);
    }

    /// Accepts signatures spelled `valid`.
    struct ValidLiteral;

    impl WalletSignatureVerifier for ValidLiteral {
        fn verify(&self, _wallet: &str, _message: &str, signature: &str) -> bool {
            signature == "valid"
        }
    }

    #[tokio::test]
    async fn test_forged_wallet_signature_is_not_associated() {
        let mut h = harness();
        h.ctx = h.ctx.clone().with_verifiers(WalletVerifiers::new(
            Arc::new(ValidLiteral),
            Arc::new(ValidLiteral),
        ));
        initialize_blocks_table(&h.ctx).await.unwrap();
        let multihash = Multihash::sha256([4; 32]);
        h.metadata.insert(
            &multihash_to_cid(&multihash),
            json!({
                "associated_wallets": {
                    "0xaaa": {"signature": "valid"},
                    "0xbbb": {"signature": "forged"}
                }
            }),
        );
        h.chain.mine(
            "0xb0",
            100,
            vec![
                add_user("0xt1", 1, "ann"),
                user_tx("0xt2", UserEvent::UpdateMultihash { user_id: 1, multihash }),
            ],
        );

        run_pass(&h.ctx).await.unwrap();

        let tx = h.store.begin().await.unwrap();
        let wallets: Vec<AssociatedWallet> = repo::select_where(
            tx.as_ref(),
            AssociatedWallet::user_chain_key(1, WalletChain::Eth)
                .and(WhereClause::eq("is_current", true)),
        )
        .await
        .unwrap();
        let addresses: Vec<&str> = wallets.iter().map(|w| w.wallet.as_str()).collect();
        assert_eq!(addresses, vec!["0xaaa"]);
        assert!(user(&h, 1).await.is_some());
    }
}
