//! Reorg handling: undo indexed blocks, newest first, restoring each
//! entity's most recent surviving version as current.

use std::collections::BTreeSet;

use crate::chain::ZERO_BLOCK_HASH;
use crate::db::{DbError, OrderBy, StoreTransaction};
use crate::models::{
    repo, AssociatedWallet, BlockRow, Follow, Playlist, Repost, Save, Track, TrackRoute,
    UrsmContentNode, User, UserEvents, Versioned,
};

use super::block::{invalidate_entity_caches, set_indexed_pointers};
use super::context::IndexerContext;
use super::error::IndexerError;

/// Passes asked to revert more blocks than this are refused outright.
pub const MAX_REVERT_BLOCKS: usize = 10_000;
/// Longer revert lists are cut to this many blocks per pass.
pub const REVERT_BATCH_BLOCKS: usize = 5_000;

/// Entities touched by a revert pass.
#[derive(Debug, Default, PartialEq)]
pub struct RevertReport {
    pub blocks: usize,
    pub users: BTreeSet<i64>,
    pub tracks: BTreeSet<i64>,
    pub playlists: BTreeSet<i64>,
}

/// Apply the size limits to a tip-first revert list.
pub fn limit_revert_list(mut blocks: Vec<BlockRow>) -> Result<Vec<BlockRow>, IndexerError> {
    let requested = blocks.len();
    if requested > MAX_REVERT_BLOCKS {
        return Err(IndexerError::RevertLimitExceeded(requested));
    }
    if requested > REVERT_BATCH_BLOCKS {
        tracing::warn!(
            "Revert list of {} blocks exceeds {}, reverting the newest {} this pass",
            requested,
            REVERT_BATCH_BLOCKS,
            REVERT_BATCH_BLOCKS
        );
        blocks.truncate(REVERT_BATCH_BLOCKS);
    }
    Ok(blocks)
}

/// Revert `blocks` (tip-first) in a single storage transaction, then move
/// the indexed pointers to the new tip and drop stale cache entries.
pub async fn revert_blocks(
    ctx: &IndexerContext,
    blocks: Vec<BlockRow>,
) -> Result<RevertReport, IndexerError> {
    let blocks = limit_revert_list(blocks)?;
    if blocks.is_empty() {
        return Ok(RevertReport::default());
    }
    tracing::info!("Reverting {} blocks", blocks.len());

    let tx = ctx.store.begin().await?;
    let mut report = RevertReport::default();
    let result = async {
        for block in &blocks {
            revert_block(ctx, tx.as_ref(), block, &mut report).await?;
        }
        BlockRow::require_current(tx.as_ref()).await
    }
    .await;

    let tip = match result {
        Ok(tip) => tip,
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("Rollback of revert pass failed: {}", rollback);
            }
            tracing::error!("Revert pass failed: {}", e);
            return Err(e.into());
        }
    };
    tx.commit().await?;

    tracing::info!(
        "Reverted {} blocks, indexed tip is now {} ({:?})",
        report.blocks,
        tip.blockhash,
        tip.number
    );
    if let Some(number) = tip.number {
        set_indexed_pointers(ctx.state.as_ref(), number, &tip.blockhash).await?;
    }
    invalidate_entity_caches(
        ctx.state.as_ref(),
        &report.users,
        &report.tracks,
        &report.playlists,
    )
    .await?;
    Ok(report)
}

async fn revert_block(
    ctx: &IndexerContext,
    tx: &dyn StoreTransaction,
    block: &BlockRow,
    report: &mut RevertReport,
) -> Result<(), DbError> {
    let Some(number) = block.number else {
        return Err(DbError::Corrupted(format!(
            "refusing to revert start block {}",
            block.blockhash
        )));
    };
    let hash = block.blockhash.as_str();
    tracing::info!("Reverting block {} ({})", number, hash);

    let parent = match block.parenthash.as_deref() {
        Some(ZERO_BLOCK_HASH) | None => ctx.config.start_block_hash.as_str(),
        Some(parent) => parent,
    };
    BlockRow::set_current(tx, hash, false).await?;
    BlockRow::set_current(tx, parent, true).await?;

    let saves: Vec<Save> = repo::rows_at_block(tx, hash).await?;
    let reposts: Vec<Repost> = repo::rows_at_block(tx, hash).await?;
    let follows: Vec<Follow> = repo::rows_at_block(tx, hash).await?;
    let playlists: Vec<Playlist> = repo::rows_at_block(tx, hash).await?;
    let tracks: Vec<Track> = repo::rows_at_block(tx, hash).await?;
    let nodes: Vec<UrsmContentNode> = repo::rows_at_block(tx, hash).await?;
    let users: Vec<User> = repo::rows_at_block(tx, hash).await?;
    let wallets: Vec<AssociatedWallet> = repo::rows_at_block(tx, hash).await?;
    let user_events: Vec<UserEvents> = repo::rows_at_block(tx, hash).await?;
    let routes: Vec<TrackRoute> = repo::rows_at_block(tx, hash).await?;

    futures::try_join!(
        revert_rows(tx, &saves),
        revert_rows(tx, &reposts),
        revert_rows(tx, &follows),
        revert_rows(tx, &playlists),
        revert_rows(tx, &tracks),
        revert_rows(tx, &nodes),
    )?;

    revert_rows(tx, &users).await?;

    let wallet_groups: BTreeSet<_> = wallets.iter().map(|w| (w.user_id, w.chain)).collect();
    for (user_id, chain) in wallet_groups {
        repo::revert_group::<AssociatedWallet>(
            tx,
            AssociatedWallet::user_chain_key(user_id, chain),
            hash,
            number,
        )
        .await?;
    }

    for events in &user_events {
        repo::revert_group::<UserEvents>(tx, UserEvents::key_for(events.user_id), hash, number)
            .await?;
    }

    for route in &routes {
        repo::revert_row(tx, route, Some(OrderBy::asc("slug"))).await?;
    }

    BlockRow::delete(tx, hash).await?;

    tracing::debug!(
        "Reverted block {}: {} users, {} tracks, {} playlists, {} social rows",
        number,
        users.len(),
        tracks.len(),
        playlists.len(),
        saves.len() + reposts.len() + follows.len()
    );
    report.blocks += 1;
    report.users.extend(users.iter().map(|u| u.user_id));
    report.tracks.extend(tracks.iter().map(|t| t.track_id));
    report.playlists.extend(playlists.iter().map(|p| p.playlist_id));
    Ok(())
}

async fn revert_rows<T: Versioned>(tx: &dyn StoreTransaction, rows: &[T]) -> Result<(), DbError> {
    for row in rows {
        repo::revert_row(tx, row, None).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        ContractEvent, Multihash, SocialEvent, TrackEvent, TxReceipt, UserEvent,
    };
    use crate::db::{Record, Store};
    use crate::indexer::block::index_block;
    use crate::indexer::context::testing::{
        harness, Harness, SOCIAL_FACTORY, TRACK_FACTORY, USER_FACTORY,
    };
    use crate::models::Entity;
    use crate::state::keys::{MOST_RECENT_INDEXED_BLOCK, MOST_RECENT_INDEXED_BLOCKHASH};

    fn receipt(tx: &str, to: &str, events: Vec<ContractEvent>) -> TxReceipt {
        TxReceipt {
            tx_hash: tx.to_string(),
            to: Some(to.to_string()),
            events,
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

    fn block_row(number: i64) -> BlockRow {
        BlockRow {
            blockhash: format!("0xb{}", number),
            parenthash: Some(format!("0xb{}", number - 1)),
            number: Some(number),
            is_current: false,
        }
    }

    async fn tip_first(h: &Harness, hashes: &[&str]) -> Vec<BlockRow> {
        let tx = h.store.begin().await.unwrap();
        let mut rows = Vec::new();
        for hash in hashes {
            rows.push(BlockRow::find(tx.as_ref(), hash).await.unwrap().unwrap());
        }
        rows
    }

    fn snapshot(h: &Harness) -> Vec<Vec<Record>> {
        [
            User::TABLE.name,
            Track::TABLE.name,
            TrackRoute::TABLE.name,
            Follow::TABLE.name,
            BlockRow::TABLE.name,
        ]
        .iter()
        .map(|t| h.store.rows(t))
        .collect()
    }

    #[test]
    fn test_revert_list_limits() {
        let blocks: Vec<BlockRow> = (0..6_000).rev().map(block_row).collect();
        let limited = limit_revert_list(blocks).unwrap();
        assert_eq!(limited.len(), REVERT_BATCH_BLOCKS);
        assert_eq!(limited[0].number, Some(5_999));
        assert_eq!(limited.last().unwrap().number, Some(1_000));

        let too_many: Vec<BlockRow> = (0..10_001).map(block_row).collect();
        assert!(matches!(
            limit_revert_list(too_many),
            Err(IndexerError::RevertLimitExceeded(10_001))
        ));

        let exactly: Vec<BlockRow> = (0..10_000).map(block_row).collect();
        assert_eq!(limit_revert_list(exactly).unwrap().len(), REVERT_BATCH_BLOCKS);
    }

    #[tokio::test]
    async fn test_revert_undoes_block_exactly() {
        let h = harness();
        seed_start(&h);
        let b0 = h.chain.mine(
            "0xb0",
            100,
            vec![receipt(
                "0xt0",
                USER_FACTORY,
                vec![ContractEvent::User(UserEvent::AddUser {
                    user_id: 1,
                    handle: "alice".to_string(),
                    wallet: "0x01".to_string(),
                })],
            )],
        );
        index_block(&h.ctx, &b0).await.unwrap();
        let before = snapshot(&h);

        let b1 = h.chain.mine(
            "0xb1",
            200,
            vec![
                receipt(
                    "0xt1",
                    USER_FACTORY,
                    vec![ContractEvent::User(UserEvent::UpdateName {
                        user_id: 1,
                        name: "Alice Prime".to_string(),
                    })],
                ),
                receipt(
                    "0xt2",
                    SOCIAL_FACTORY,
                    vec![ContractEvent::Social(SocialEvent::UserFollowAdded {
                        follower_user_id: 1,
                        followee_user_id: 2,
                    })],
                ),
            ],
        );
        index_block(&h.ctx, &b1).await.unwrap();
        assert_ne!(snapshot(&h), before);

        let report = revert_blocks(&h.ctx, tip_first(&h, &["0xb1"]).await)
            .await
            .unwrap();
        assert_eq!(report.blocks, 1);
        assert_eq!(report.users, BTreeSet::from([1]));
        assert_eq!(snapshot(&h), before);

        assert_eq!(h.state.value(MOST_RECENT_INDEXED_BLOCK).as_deref(), Some("0"));
        assert_eq!(
            h.state.value(MOST_RECENT_INDEXED_BLOCKHASH).as_deref(),
            Some("0xb0")
        );
    }

    #[tokio::test]
    async fn test_reverting_every_block_restores_start() {
        let h = harness();
        seed_start(&h);
        let b0 = h.chain.mine(
            "0xb0",
            100,
            vec![receipt(
                "0xt0",
                USER_FACTORY,
                vec![ContractEvent::User(UserEvent::AddUser {
                    user_id: 1,
                    handle: "alice".to_string(),
                    wallet: "0x01".to_string(),
                })],
            )],
        );
        index_block(&h.ctx, &b0).await.unwrap();

        revert_blocks(&h.ctx, tip_first(&h, &["0xb0"]).await)
            .await
            .unwrap();
        assert!(h.store.rows(User::TABLE.name).is_empty());

        let tx = h.store.begin().await.unwrap();
        let tip = BlockRow::require_current(tx.as_ref()).await.unwrap();
        assert_eq!(tip.blockhash, ZERO_BLOCK_HASH);
        assert_eq!(h.store.rows(BlockRow::TABLE.name).len(), 1);
    }

    #[tokio::test]
    async fn test_track_route_restored_on_revert() {
        let h = harness();
        seed_start(&h);
        let metadata = |title: &str, seed: u8| {
            let multihash = Multihash::sha256([seed; 32]);
            let cid = crate::metadata::multihash_to_cid(&multihash);
            h.metadata
                .insert(&cid, serde_json::json!({ "title": title }));
            multihash
        };
        let first = metadata("First Cut", 1);
        let second = metadata("Second Cut", 2);

        let b0 = h.chain.mine(
            "0xb0",
            100,
            vec![receipt(
                "0xt0",
                TRACK_FACTORY,
                vec![ContractEvent::Track(TrackEvent::NewTrack {
                    track_id: 5,
                    owner_id: 1,
                    multihash: first,
                })],
            )],
        );
        index_block(&h.ctx, &b0).await.unwrap();
        let b1 = h.chain.mine(
            "0xb1",
            200,
            vec![receipt(
                "0xt1",
                TRACK_FACTORY,
                vec![ContractEvent::Track(TrackEvent::UpdateTrack {
                    track_id: 5,
                    owner_id: 1,
                    multihash: second,
                })],
            )],
        );
        index_block(&h.ctx, &b1).await.unwrap();

        let tx = h.store.begin().await.unwrap();
        let route: TrackRoute = repo::current(tx.as_ref(), TrackRoute::key_for(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(route.slug, "second-cut");
        drop(tx);

        let report = revert_blocks(&h.ctx, tip_first(&h, &["0xb1"]).await)
            .await
            .unwrap();
        assert_eq!(report.tracks, BTreeSet::from([5]));
        assert!(h.state.deleted().contains(&"track:id:5".to_string()));

        let tx = h.store.begin().await.unwrap();
        let route: TrackRoute = repo::current(tx.as_ref(), TrackRoute::key_for(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(route.slug, "first-cut");
        let track: Track = repo::current(tx.as_ref(), Track::key_for(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(track.title.as_deref(), Some("First Cut"));
    }

    #[tokio::test]
    async fn test_too_many_blocks_is_fatal() {
        let h = harness();
        let blocks: Vec<BlockRow> = (0..10_001).map(block_row).collect();
        let err = revert_blocks(&h.ctx, blocks).await.unwrap_err();
        assert!(matches!(err, IndexerError::RevertLimitExceeded(10_001)));
    }
}
