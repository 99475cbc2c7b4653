use std::collections::BTreeMap;

use crate::chain::{ContractEvent, SocialEvent, TxReceipt};
use crate::db::{DbError, StoreTransaction};
use crate::models::{repo, Follow, Playlist, Repost, SocialItemType};

use super::{working_copy, ApplierOutput, ApplyContext};

/// Last action seen for one (actor, target, type) tuple in the block.
#[derive(Debug, Clone)]
pub(super) struct Action {
    pub is_delete: bool,
    pub txhash: String,
}

/// Playlist reposts and saves are recorded against albums when the
/// playlist is one.
pub(super) async fn playlist_item_type(
    tx: &dyn StoreTransaction,
    playlist_id: i64,
) -> Result<SocialItemType, DbError> {
    let playlist: Option<Playlist> = repo::current(tx, Playlist::key_for(playlist_id)).await?;
    Ok(match playlist {
        Some(p) if p.is_album => SocialItemType::Album,
        _ => SocialItemType::Playlist,
    })
}

pub async fn apply_social_features(
    ctx: &mut ApplyContext<'_>,
    receipts: &[TxReceipt],
) -> Result<ApplierOutput, DbError> {
    let tx = ctx.tx;
    let block = ctx.block;
    let mut reposts: BTreeMap<(i64, i64, SocialItemType), Action> = BTreeMap::new();
    let mut follows: BTreeMap<(i64, i64), Action> = BTreeMap::new();

    for receipt in receipts {
        for event in &receipt.events {
            let ContractEvent::Social(event) = event else {
                continue;
            };
            let action = |is_delete| Action {
                is_delete,
                txhash: receipt.tx_hash.clone(),
            };
            match event {
                SocialEvent::TrackRepostAdded { user_id, track_id } => {
                    reposts.insert((*user_id, *track_id, SocialItemType::Track), action(false));
                }
                SocialEvent::TrackRepostDeleted { user_id, track_id } => {
                    reposts.insert((*user_id, *track_id, SocialItemType::Track), action(true));
                }
                SocialEvent::PlaylistRepostAdded { user_id, playlist_id } => {
                    let kind = playlist_item_type(tx, *playlist_id).await?;
                    reposts.insert((*user_id, *playlist_id, kind), action(false));
                }
                SocialEvent::PlaylistRepostDeleted { user_id, playlist_id } => {
                    let kind = playlist_item_type(tx, *playlist_id).await?;
                    reposts.insert((*user_id, *playlist_id, kind), action(true));
                }
                SocialEvent::UserFollowAdded {
                    follower_user_id,
                    followee_user_id,
                } => {
                    follows.insert((*follower_user_id, *followee_user_id), action(false));
                }
                SocialEvent::UserFollowDeleted {
                    follower_user_id,
                    followee_user_id,
                } => {
                    follows.insert((*follower_user_id, *followee_user_id), action(true));
                }
            }
        }
    }

    let mut output = ApplierOutput::default();

    let mut repost_versions = Vec::with_capacity(reposts.len());
    for ((user_id, item_id, kind), action) in reposts {
        let mut repost = working_copy(
            tx,
            Repost::key_for(user_id, item_id, kind),
            ctx.meta(&action.txhash),
            |meta| Repost {
                meta,
                user_id,
                repost_item_id: item_id,
                repost_type: kind,
                is_delete: false,
                created_at: block.timestamp,
            },
        )
        .await?;
        repost.is_delete = action.is_delete;
        output.ids.insert(user_id);
        repost_versions.push(repost);
    }
    repo::flush_versions(tx, &repost_versions).await?;

    let mut follow_versions = Vec::with_capacity(follows.len());
    for ((follower, followee), action) in follows {
        let mut follow = working_copy(
            tx,
            Follow::key_for(follower, followee),
            ctx.meta(&action.txhash),
            |meta| Follow {
                meta,
                follower_user_id: follower,
                followee_user_id: followee,
                is_delete: false,
                created_at: block.timestamp,
            },
        )
        .await?;
        follow.is_delete = action.is_delete;
        output.ids.insert(follower);
        follow_versions.push(follow);
    }
    repo::flush_versions(tx, &follow_versions).await?;

    output.changed = repost_versions.len() + follow_versions.len();
    Ok(output)
}
