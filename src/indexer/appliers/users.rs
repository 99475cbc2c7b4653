use std::collections::BTreeMap;

use crate::chain::{ContractEvent, TxReceipt, UserEvent};
use crate::db::DbError;
use crate::indexer::challenges::{ChallengeEvent, ChallengeEventKind};
use crate::indexer::prefetch::Prefetched;
use crate::metadata::{multihash_to_cid, UserMetadata};
use crate::models::{repo, User, WalletChain};

use super::user_events::update_user_events;
use super::wallets::update_associated_wallets;
use super::{working_copy, ApplierOutput, ApplyContext};

/// Follow-up work for an accepted event, run only once the resulting user
/// passes validation.
#[derive(Default)]
struct Accepted<'m> {
    metadata: Option<&'m UserMetadata>,
    connect_verified: bool,
}

pub async fn apply_users(
    ctx: &mut ApplyContext<'_>,
    receipts: &[TxReceipt],
) -> Result<ApplierOutput, DbError> {
    let prefetched = ctx.prefetched;
    let block = ctx.block;
    let mut working: BTreeMap<i64, User> = BTreeMap::new();
    let mut output = ApplierOutput::default();

    for receipt in receipts {
        for event in &receipt.events {
            let ContractEvent::User(event) = event else {
                continue;
            };
            let user_id = event.user_id();

            let mut candidate = match working.get(&user_id) {
                Some(user) => user.clone(),
                None => {
                    working_copy(
                        ctx.tx,
                        User::key_for(user_id),
                        ctx.meta(&receipt.tx_hash),
                        |meta| User::seed(user_id, meta, block.timestamp),
                    )
                    .await?
                }
            };
            candidate.meta.txhash = receipt.tx_hash.clone();

            let Some(accepted) = apply_user_event(&mut candidate, event, prefetched) else {
                tracing::info!(
                    "Dropped {} for user {} in tx {}: blacklisted content",
                    event.name(),
                    user_id,
                    receipt.tx_hash
                );
                continue;
            };
            candidate.updated_at = block.timestamp;
            move_photos_to_sizes(&mut candidate);

            if let Some(missing) = candidate.missing_required_field() {
                ctx.skip_transaction(&receipt.tx_hash, "user", user_id, missing)
                    .await?;
                continue;
            }

            if let Some(metadata) = accepted.metadata {
                if let Some(wallets) = &metadata.associated_wallets {
                    update_associated_wallets(ctx, user_id, WalletChain::Eth, wallets, &receipt.tx_hash)
                        .await?;
                }
                if let Some(wallets) = &metadata.associated_sol_wallets {
                    update_associated_wallets(ctx, user_id, WalletChain::Sol, wallets, &receipt.tx_hash)
                        .await?;
                }
                if let Some(events) = &metadata.events {
                    update_user_events(ctx, user_id, events, &receipt.tx_hash).await?;
                }
            }
            if accepted.connect_verified {
                ctx.effects.challenge_events.push(ChallengeEvent::new(
                    ChallengeEventKind::ConnectVerified,
                    block.number,
                    user_id,
                ));
            }

            tracing::debug!("Applied {} to user {}", event.name(), user_id);
            working.insert(user_id, candidate);
            output.changed += 1;
        }
    }

    let versions: Vec<User> = working.into_values().collect();
    repo::flush_versions(ctx.tx, &versions).await?;

    for user in &versions {
        output.ids.insert(user.user_id);
        ctx.effects.challenge_events.push(ChallengeEvent::new(
            ChallengeEventKind::ProfileUpdate,
            block.number,
            user.user_id,
        ));
    }
    Ok(output)
}

/// Returns `None` when the event must be dropped.
fn apply_user_event<'m>(
    user: &mut User,
    event: &UserEvent,
    prefetched: &'m Prefetched,
) -> Option<Accepted<'m>> {
    let mut accepted = Accepted::default();
    match event {
        UserEvent::AddUser { handle, wallet, .. } => {
            user.handle = Some(handle.clone());
            user.handle_lc = Some(handle.to_lowercase());
            user.wallet = Some(wallet.to_lowercase());
        }
        UserEvent::UpdateMultihash { multihash, .. } => {
            let cid = multihash_to_cid(multihash);
            if prefetched.is_blacklisted(&cid) {
                return None;
            }
            if let Some(metadata) = prefetched.user(&cid) {
                apply_metadata(user, metadata);
                accepted.metadata = Some(metadata);
            }
            user.metadata_multihash = Some(cid);
        }
        UserEvent::UpdateName { name, .. } => user.name = Some(name.clone()),
        UserEvent::UpdateLocation { location, .. } => user.location = Some(location.clone()),
        UserEvent::UpdateBio { bio, .. } => user.bio = Some(bio.clone()),
        UserEvent::UpdateProfilePhoto { multihash, .. } => {
            let cid = multihash_to_cid(multihash);
            if prefetched.is_blacklisted(&cid) {
                return None;
            }
            user.profile_picture = Some(cid);
        }
        UserEvent::UpdateCoverPhoto { multihash, .. } => {
            let cid = multihash_to_cid(multihash);
            if prefetched.is_blacklisted(&cid) {
                return None;
            }
            user.cover_photo = Some(cid);
        }
        UserEvent::UpdateIsCreator { is_creator, .. } => user.is_creator = *is_creator,
        UserEvent::UpdateIsVerified { is_verified, .. } => {
            user.is_verified = *is_verified;
            accepted.connect_verified = *is_verified;
        }
        UserEvent::UpdateCreatorNodeEndpoint { endpoint, .. } => {
            if user.has_replica_set() {
                tracing::debug!(
                    "Ignoring creator node endpoint for user {} with a replica set",
                    user.user_id
                );
            } else {
                user.creator_node_endpoint = Some(endpoint.clone());
            }
        }
    }
    Some(accepted)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn apply_metadata(user: &mut User, metadata: &UserMetadata) {
    // The `_sizes` variant wins; both end up in the sizes column.
    if let Some(v) = non_empty(&metadata.profile_picture) {
        user.profile_picture = Some(v);
    }
    if let Some(v) = non_empty(&metadata.profile_picture_sizes) {
        user.profile_picture = Some(v);
    }
    if let Some(v) = non_empty(&metadata.cover_photo) {
        user.cover_photo = Some(v);
    }
    if let Some(v) = non_empty(&metadata.cover_photo_sizes) {
        user.cover_photo = Some(v);
    }
    if let Some(v) = non_empty(&metadata.bio) {
        user.bio = Some(v);
    }
    if let Some(v) = non_empty(&metadata.name) {
        user.name = Some(v);
    }
    if let Some(v) = non_empty(&metadata.location) {
        user.location = Some(v);
    }
    if metadata.collectibles.is_some() {
        user.has_collectibles = metadata.has_collectibles();
    }
    if let Some(library) = metadata.playlist_library.as_ref().filter(|v| !v.is_null()) {
        user.playlist_library = Some(library.clone());
    }
    if let Some(is_deactivated) = metadata.is_deactivated {
        user.is_deactivated = is_deactivated;
    }
}

fn move_photos_to_sizes(user: &mut User) {
    if let Some(picture) = user.profile_picture.take() {
        user.profile_picture_sizes = Some(picture);
    }
    if let Some(cover) = user.cover_photo.take() {
        user.cover_photo_sizes = Some(cover);
    }
}
