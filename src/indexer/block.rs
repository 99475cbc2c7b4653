//! Per-block state machine: fetch receipts, partition, prefetch metadata,
//! apply entities, commit, then release the post-commit signals.

use std::collections::BTreeSet;

use crate::chain::{ChainBlock, ContractKind};
use crate::db::{DbError, StoreTransaction};
use crate::models::BlockRow;
use crate::state::keys::{
    self, BALANCE_REFRESH_QUEUE, MOST_RECENT_INDEXED_BLOCK, MOST_RECENT_INDEXED_BLOCKHASH,
};
use crate::state::SharedState;

use super::appliers::{
    apply_playlists, apply_replica_sets, apply_social_features, apply_tracks, apply_user_library,
    apply_users, ApplierOutput, ApplyContext, BlockEffects,
};
use super::challenges::{check_trending_challenge, dispatch_challenge_events};
use super::context::IndexerContext;
use super::error::{IndexerError, IndexingError, Stage, COMMIT_TX_HASH};
use super::partition::partition_transactions;
use super::prefetch::prefetch_metadata;
use super::receipts::fetch_tx_receipts;
use super::skip::{clear_error, record_error, resolve_skip};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Indexed { transactions: usize, changes: usize },
    AlreadyIndexed,
}

/// Per-family applier results for one block.
#[derive(Default)]
struct Applied {
    users: ApplierOutput,
    tracks: ApplierOutput,
    social: ApplierOutput,
    replica_sets: ApplierOutput,
    playlists: ApplierOutput,
    user_library: ApplierOutput,
    effects: BlockEffects,
    transactions: usize,
}

impl Applied {
    fn changes(&self) -> usize {
        [
            &self.users,
            &self.tracks,
            &self.social,
            &self.replica_sets,
            &self.playlists,
            &self.user_library,
        ]
        .iter()
        .map(|o| o.changed)
        .sum()
    }
}

enum Prepared {
    Applied(Applied),
    AlreadyIndexed,
}

/// Index `block` on top of the current indexed tip inside one storage
/// transaction. Indexing errors are recorded for the skip policy before
/// being returned.
pub async fn index_block(
    ctx: &IndexerContext,
    block: &ChainBlock,
) -> Result<BlockOutcome, IndexerError> {
    let tx = ctx.store.begin().await?;

    let prepared = match prepare_block(ctx, tx.as_ref(), block).await {
        Ok(prepared) => prepared,
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("Rollback of block {} failed: {}", block.number, rollback);
            }
            return Err(fail(ctx, err).await);
        }
    };

    let applied = match prepared {
        Prepared::AlreadyIndexed => {
            tx.rollback().await?;
            tracing::info!("Block {} ({}) already indexed", block.number, block.hash);
            return Ok(BlockOutcome::AlreadyIndexed);
        }
        Prepared::Applied(applied) => applied,
    };

    if let Err(e) = tx.commit().await {
        let err = IndexingError::new(Stage::Commit, block, COMMIT_TX_HASH, e);
        return Err(fail(ctx, err.into()).await);
    }
    tracing::info!(
        "Committed block {} with {} changes from {} transactions",
        block.number,
        applied.changes(),
        applied.transactions
    );

    after_commit(ctx, block, &applied).await?;

    Ok(BlockOutcome::Indexed {
        transactions: applied.transactions,
        changes: applied.changes(),
    })
}

async fn fail(ctx: &IndexerContext, err: IndexerError) -> IndexerError {
    if let IndexerError::Indexing(indexing) = &err {
        if let Err(record) = record_error(ctx, indexing.clone()).await {
            tracing::error!("Failed to record indexing error: {}", record);
        }
    }
    err
}

async fn prepare_block(
    ctx: &IndexerContext,
    tx: &dyn StoreTransaction,
    block: &ChainBlock,
) -> Result<Prepared, IndexerError> {
    if BlockRow::find(tx, &block.hash).await?.is_some() {
        return Ok(Prepared::AlreadyIndexed);
    }

    let previous = BlockRow::require_current(tx).await?;
    BlockRow::set_current(tx, &previous.blockhash, false).await?;
    BlockRow {
        blockhash: block.hash.clone(),
        parenthash: Some(block.parent_hash.clone()),
        number: Some(block.number),
        is_current: true,
    }
    .insert(tx)
    .await?;

    ctx.resolve_replica_set_manager().await;

    // Skips apply before receipt lookups.
    let skip = resolve_skip(ctx, tx, block).await?;
    let receipts = fetch_tx_receipts(&ctx.chain, block, &skip).await?;
    tracing::info!(
        "Fetched {} receipts for block {}",
        receipts.len(),
        block.number
    );

    let partitioned = partition_transactions(receipts, &ctx.registry, &skip);
    let prefetched = prefetch_metadata(tx, &ctx.metadata, block, &partitioned).await?;

    let applier_failed =
        |e: DbError| IndexingError::new(Stage::ApplyEntities, block, String::new(), e);
    let mut apply = ApplyContext::new(tx, block, &prefetched, &ctx.verifiers);
    let mut applied = Applied {
        transactions: partitioned.len(),
        ..Default::default()
    };

    applied.users = apply_users(&mut apply, partitioned.receipts(ContractKind::User))
        .await
        .map_err(applier_failed)?;
    applied.tracks = apply_tracks(&mut apply, partitioned.receipts(ContractKind::Track))
        .await
        .map_err(applier_failed)?;
    applied.social = apply_social_features(&mut apply, partitioned.receipts(ContractKind::Social))
        .await
        .map_err(applier_failed)?;
    applied.replica_sets =
        apply_replica_sets(&mut apply, partitioned.receipts(ContractKind::ReplicaSet))
            .await
            .map_err(applier_failed)?;
    applied.playlists = apply_playlists(&mut apply, partitioned.receipts(ContractKind::Playlist))
        .await
        .map_err(applier_failed)?;
    applied.user_library =
        apply_user_library(&mut apply, partitioned.receipts(ContractKind::UserLibrary))
            .await
            .map_err(applier_failed)?;
    applied.effects = apply.effects;

    tracing::debug!(
        "Block {}: users={} tracks={} social={} replica_sets={} playlists={} library={}",
        block.number,
        applied.users.changed,
        applied.tracks.changed,
        applied.social.changed,
        applied.replica_sets.changed,
        applied.playlists.changed,
        applied.user_library.changed
    );
    Ok(Prepared::Applied(applied))
}

async fn after_commit(
    ctx: &IndexerContext,
    block: &ChainBlock,
    applied: &Applied,
) -> Result<(), IndexerError> {
    let state = ctx.state.as_ref();
    clear_error(state).await?;

    dispatch_challenge_events(state, &applied.effects.challenge_events).await?;
    invalidate_caches(state, applied).await?;

    let refresh: Vec<String> = applied
        .effects
        .balance_refresh
        .iter()
        .map(i64::to_string)
        .collect();
    state.push(BALANCE_REFRESH_QUEUE, &refresh).await?;

    set_indexed_pointers(state, block.number, &block.hash).await?;

    if let Err(e) = check_trending_challenge(state, block.timestamp).await {
        tracing::error!("Trending challenge check failed at block {}: {}", block.number, e);
    }
    Ok(())
}

async fn invalidate_caches(state: &dyn SharedState, applied: &Applied) -> Result<(), IndexerError> {
    let mut users = BTreeSet::new();
    if applied.users.changed > 0 {
        users.extend(&applied.users.ids);
    }
    if applied.replica_sets.changed > 0 {
        users.extend(&applied.replica_sets.ids);
    }
    let none = BTreeSet::new();
    let tracks = if applied.tracks.changed > 0 {
        &applied.tracks.ids
    } else {
        &none
    };
    let playlists = if applied.playlists.changed > 0 {
        &applied.playlists.ids
    } else {
        &none
    };
    invalidate_entity_caches(state, &users, tracks, playlists).await
}

/// Delete the read-side cache entries of the given entities.
pub async fn invalidate_entity_caches(
    state: &dyn SharedState,
    users: &BTreeSet<i64>,
    tracks: &BTreeSet<i64>,
    playlists: &BTreeSet<i64>,
) -> Result<(), IndexerError> {
    let cache_keys: Vec<String> = users
        .iter()
        .map(|&id| keys::user_cache(id))
        .chain(tracks.iter().map(|&id| keys::track_cache(id)))
        .chain(playlists.iter().map(|&id| keys::playlist_cache(id)))
        .collect();
    if cache_keys.is_empty() {
        return Ok(());
    }
    state.delete(&cache_keys).await?;
    tracing::debug!("Invalidated {} cache entries", cache_keys.len());
    Ok(())
}

pub async fn set_indexed_pointers(
    state: &dyn SharedState,
    number: i64,
    hash: &str,
) -> Result<(), IndexerError> {
    state
        .set(MOST_RECENT_INDEXED_BLOCK, &number.to_string(), None)
        .await?;
    state.set(MOST_RECENT_INDEXED_BLOCKHASH, hash, None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        ContractEvent, Multihash, PlaylistEvent, ReplicaSetEvent, TxReceipt, UserEvent,
        REPLICA_SET_MANAGER_NAME, ZERO_ADDRESS, ZERO_BLOCK_HASH,
    };
    use crate::db::Store;
    use crate::indexer::context::testing::{
        config, harness, harness_with, Harness, PLAYLIST_FACTORY, USER_FACTORY,
    };
    use crate::metadata::multihash_to_cid;
    use crate::models::{repo, Entity, IpldBlacklist, Playlist, SkippedTransaction, User};
    use crate::state::keys::{CHALLENGE_EVENT_QUEUE, INDEXING_ERROR};

    fn add_user(tx: &str, user_id: i64, handle: &str) -> TxReceipt {
        TxReceipt {
            tx_hash: tx.to_string(),
            to: Some(USER_FACTORY.to_string()),
            events: vec![ContractEvent::User(UserEvent::AddUser {
                user_id,
                handle: handle.to_string(),
                wallet: format!("0x{:040}", user_id),
            })],
        }
    }

    fn seed_start(h: &Harness) {
        h.store.seed(
            BlockRow::TABLE.name,
            BlockRow {
                blockhash: ZERO_BLOCK_HASH.to_string(),
                parenthash: None,
                number: None,
                is_current: true,
            }
            .to_record(),
        );
    }

    async fn current_block(h: &Harness) -> BlockRow {
        let tx = h.store.begin().await.unwrap();
        BlockRow::require_current(tx.as_ref()).await.unwrap()
    }

    #[tokio::test]
    async fn test_indexes_block_and_releases_signals() {
        let h = harness();
        seed_start(&h);
        let block = h.chain.mine("0xb0", 1_000, vec![add_user("0xt1", 1, "Ann")]);

        let outcome = index_block(&h.ctx, &block).await.unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Indexed {
                transactions: 1,
                changes: 1
            }
        );

        let tip = current_block(&h).await;
        assert_eq!(tip.blockhash, "0xb0");
        assert_eq!(tip.parenthash.as_deref(), Some(ZERO_BLOCK_HASH));
        assert_eq!(h.store.rows(BlockRow::TABLE.name).len(), 2);

        let tx = h.store.begin().await.unwrap();
        let user: User = repo::current(tx.as_ref(), User::key_for(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.handle.as_deref(), Some("Ann"));

        assert_eq!(h.state.value(MOST_RECENT_INDEXED_BLOCK).as_deref(), Some("0"));
        assert_eq!(
            h.state.value(MOST_RECENT_INDEXED_BLOCKHASH).as_deref(),
            Some("0xb0")
        );
        assert!(h.state.deleted().contains(&"user:id:1".to_string()));
        assert_eq!(h.state.list(CHALLENGE_EVENT_QUEUE).len(), 1);
    }

    #[tokio::test]
    async fn test_block_is_never_applied_twice() {
        let h = harness();
        seed_start(&h);
        let block = h.chain.mine("0xb0", 1_000, vec![add_user("0xt1", 1, "Ann")]);

        index_block(&h.ctx, &block).await.unwrap();
        let outcome = index_block(&h.ctx, &block).await.unwrap();
        assert_eq!(outcome, BlockOutcome::AlreadyIndexed);
        assert_eq!(h.store.rows(User::TABLE.name).len(), 1);
        assert_eq!(h.store.rows(BlockRow::TABLE.name).len(), 2);
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_no_partial_state() {
        let h = harness();
        seed_start(&h);
        let block = h.chain.mine("0xb0", 1_000, vec![add_user("0xt1", 1, "Ann")]);
        h.store.fail_next_commit();

        let IndexerError::Indexing(err) = index_block(&h.ctx, &block).await.unwrap_err() else {
            panic!("expected an indexing error");
        };
        assert_eq!(err.stage, Stage::Commit);
        assert_eq!(err.txhash, COMMIT_TX_HASH);

        assert!(h.store.rows(User::TABLE.name).is_empty());
        assert_eq!(current_block(&h).await.blockhash, ZERO_BLOCK_HASH);
        assert!(h.state.value(MOST_RECENT_INDEXED_BLOCK).is_none());
        assert!(h.state.value(INDEXING_ERROR).is_some());
    }

    #[tokio::test]
    async fn test_receipt_failure_is_recorded_with_tx_hash() {
        let h = harness();
        seed_start(&h);
        let block = h.chain.mine(
            "0xb0",
            1_000,
            vec![add_user("0xt1", 1, "Ann"), add_user("0xt2", 2, "Ben")],
        );
        h.chain.fail_receipt("0xt2");

        let err = index_block(&h.ctx, &block).await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::Indexing(IndexingError { stage: Stage::FetchReceipts, ref txhash, .. })
                if txhash == "0xt2"
        ));
        assert!(h.store.rows(User::TABLE.name).is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_receipt_failure_is_skipped() {
        let h = harness();
        seed_start(&h);
        let block = h.chain.mine(
            "0xb0",
            1_000,
            vec![add_user("0xt1", 1, "Ann"), add_user("0xt2", 2, "Ben")],
        );
        h.chain.fail_receipt("0xt2");

        // Two identical failures confirm the error under the harness config.
        for _ in 0..2 {
            assert!(index_block(&h.ctx, &block).await.is_err());
        }
        assert!(h.store.rows(SkippedTransaction::TABLE.name).is_empty());

        let outcome = index_block(&h.ctx, &block).await.unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Indexed {
                transactions: 1,
                changes: 1
            }
        );
        let skipped = h.store.rows(SkippedTransaction::TABLE.name);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].text("txhash").unwrap(), "0xt2");
        assert_eq!(current_block(&h).await.blockhash, "0xb0");
        assert!(h.state.value(INDEXING_ERROR).is_none());
    }

    #[tokio::test]
    async fn test_confirmed_poison_transaction_is_skipped() {
        let h = harness();
        seed_start(&h);
        let block = h.chain.mine(
            "0xb0",
            1_000,
            vec![add_user("0xt1", 1, "Ann"), add_user("0xt2", 2, "Ben")],
        );
        let poison = IndexingError::new(Stage::ApplyEntities, &block, "0xt2", "bad row");
        record_error(&h.ctx, poison.clone()).await.unwrap();
        record_error(&h.ctx, poison).await.unwrap();

        let outcome = index_block(&h.ctx, &block).await.unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Indexed {
                transactions: 1,
                changes: 1
            }
        );
        let users = h.store.rows(User::TABLE.name);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].int("user_id").unwrap(), 1);

        let skipped = h.store.rows(SkippedTransaction::TABLE.name);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].text("txhash").unwrap(), "0xt2");
        assert!(h.state.value(INDEXING_ERROR).is_none());
    }

    #[tokio::test]
    async fn test_unrelated_destinations_are_ignored() {
        let h = harness();
        seed_start(&h);
        let mut stray = add_user("0xt1", 1, "Ann");
        stray.to = Some("0x00000000000000000000000000000000000000ff".to_string());
        let mut creation = add_user("0xt2", 2, "Ben");
        creation.to = None;
        let block = h.chain.mine("0xb0", 1_000, vec![stray, creation]);

        let outcome = index_block(&h.ctx, &block).await.unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Indexed {
                transactions: 0,
                changes: 0
            }
        );
        assert_eq!(current_block(&h).await.blockhash, "0xb0");
    }

    fn blacklist(h: &Harness, multihash: &Multihash) {
        h.store.seed(
            IpldBlacklist::TABLE.name,
            IpldBlacklist {
                ipld: multihash_to_cid(multihash),
                is_current: true,
            }
            .to_record(),
        );
    }

    #[tokio::test]
    async fn test_blacklisted_user_photos_are_not_indexed() {
        let h = harness();
        seed_start(&h);
        let banned = Multihash::sha256([0xb1; 32]);
        let allowed = Multihash::sha256([0xa1; 32]);
        blacklist(&h, &banned);

        let photos = TxReceipt {
            tx_hash: "0xt2".to_string(),
            to: Some(USER_FACTORY.to_string()),
            events: vec![
                ContractEvent::User(UserEvent::UpdateProfilePhoto {
                    user_id: 1,
                    multihash: banned,
                }),
                ContractEvent::User(UserEvent::UpdateCoverPhoto {
                    user_id: 1,
                    multihash: allowed,
                }),
            ],
        };
        let block = h
            .chain
            .mine("0xb0", 1_000, vec![add_user("0xt1", 1, "Ann"), photos]);
        index_block(&h.ctx, &block).await.unwrap();

        let tx = h.store.begin().await.unwrap();
        let user: User = repo::current(tx.as_ref(), User::key_for(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.profile_picture, None);
        assert_eq!(user.profile_picture_sizes, None);
        assert_eq!(
            user.cover_photo_sizes.as_deref(),
            Some(multihash_to_cid(&allowed).as_str())
        );
        assert!(h.metadata.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blacklisted_playlist_cover_is_not_indexed() {
        let h = harness();
        seed_start(&h);
        let banned = Multihash::sha256([0xb2; 32]);
        blacklist(&h, &banned);

        let playlist = TxReceipt {
            tx_hash: "0xt2".to_string(),
            to: Some(PLAYLIST_FACTORY.to_string()),
            events: vec![
                ContractEvent::Playlist(PlaylistEvent::Created {
                    playlist_id: 3,
                    owner_id: 1,
                    is_private: false,
                    is_album: false,
                    track_ids: vec![],
                }),
                ContractEvent::Playlist(PlaylistEvent::CoverPhotoUpdated {
                    playlist_id: 3,
                    multihash: banned,
                }),
            ],
        };
        let block = h
            .chain
            .mine("0xb0", 1_000, vec![add_user("0xt1", 1, "Ann"), playlist]);
        index_block(&h.ctx, &block).await.unwrap();

        let tx = h.store.begin().await.unwrap();
        let stored: Playlist = repo::current(tx.as_ref(), Playlist::key_for(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.playlist_image_sizes_multihash, None);
        assert_eq!(stored.playlist_image_multihash, None);
    }

    #[tokio::test]
    async fn test_replica_set_manager_resolved_from_registry() {
        let mut config = config();
        config.contracts.user_replica_set_manager = Some(ZERO_ADDRESS.to_string());
        config.contracts.registry = Some("0x0000000000000000000000000000000000000010".to_string());
        let h = harness_with(config);
        seed_start(&h);

        let manager = "0x00000000000000000000000000000000000000aa";
        let update = |tx: &str| TxReceipt {
            tx_hash: tx.to_string(),
            to: Some(manager.to_string()),
            events: vec![ContractEvent::ReplicaSet(ReplicaSetEvent::AddOrUpdateContentNode {
                cnode_sp_id: 4,
                delegate_owner_wallet: "0x04".to_string(),
                proposer_sp_ids: vec![1, 2, 3],
                proposer_wallets: ["0x01".into(), "0x02".into(), "0x03".into()],
            })],
        };

        // Not registered yet: the transaction is not attributed.
        let b0 = h.chain.mine("0xb0", 1_000, vec![update("0xt1")]);
        let outcome = index_block(&h.ctx, &b0).await.unwrap();
        assert!(matches!(outcome, BlockOutcome::Indexed { transactions: 0, .. }));

        h.chain.register_contract(REPLICA_SET_MANAGER_NAME, manager);
        let b1 = h.chain.mine("0xb1", 1_001, vec![update("0xt2")]);
        let outcome = index_block(&h.ctx, &b1).await.unwrap();
        assert!(matches!(outcome, BlockOutcome::Indexed { transactions: 1, .. }));

        let b2 = h.chain.mine("0xb2", 1_002, vec![]);
        index_block(&h.ctx, &b2).await.unwrap();
        assert_eq!(*h.chain.registry_lookups.lock().unwrap(), 2);
        assert!(!h.ctx.registry.needs_replica_set_manager());
    }
}
