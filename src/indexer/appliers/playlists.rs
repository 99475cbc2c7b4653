use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::chain::{ContractEvent, PlaylistEvent, TxReceipt};
use crate::db::DbError;
use crate::indexer::prefetch::Prefetched;
use crate::metadata::multihash_to_cid;
use crate::models::{repo, Playlist, PlaylistContents, PlaylistEntry};

use super::{working_copy, ApplierOutput, ApplyContext};

pub async fn apply_playlists(
    ctx: &mut ApplyContext<'_>,
    receipts: &[TxReceipt],
) -> Result<ApplierOutput, DbError> {
    let prefetched = ctx.prefetched;
    let block = ctx.block;
    let mut working: BTreeMap<i64, Playlist> = BTreeMap::new();
    let mut output = ApplierOutput::default();

    for receipt in receipts {
        for event in &receipt.events {
            let ContractEvent::Playlist(event) = event else {
                continue;
            };
            let playlist_id = event.playlist_id();

            let mut candidate = match working.get(&playlist_id) {
                Some(playlist) => playlist.clone(),
                None => {
                    working_copy(
                        ctx.tx,
                        Playlist::key_for(playlist_id),
                        ctx.meta(&receipt.tx_hash),
                        |meta| Playlist::seed(playlist_id, meta, block.timestamp),
                    )
                    .await?
                }
            };
            candidate.meta.txhash = receipt.tx_hash.clone();

            if !apply_playlist_event(&mut candidate, event, prefetched, block.timestamp) {
                tracing::info!(
                    "Dropped playlist {} update in tx {}: blacklisted content",
                    playlist_id,
                    receipt.tx_hash
                );
                continue;
            }
            candidate.updated_at = block.timestamp;

            if let Some(missing) = candidate.missing_required_field() {
                ctx.skip_transaction(&receipt.tx_hash, "playlist", playlist_id, missing)
                    .await?;
                continue;
            }
            working.insert(playlist_id, candidate);
            output.changed += 1;
        }
    }

    let versions: Vec<Playlist> = working.into_values().collect();
    repo::flush_versions(ctx.tx, &versions).await?;
    output.ids.extend(versions.iter().map(|p| p.playlist_id));
    Ok(output)
}

/// Returns false when the event must be dropped.
fn apply_playlist_event(
    playlist: &mut Playlist,
    event: &PlaylistEvent,
    prefetched: &Prefetched,
    block_timestamp: i64,
) -> bool {
    match event {
        PlaylistEvent::Created {
            owner_id,
            is_private,
            is_album,
            track_ids,
            ..
        } => {
            playlist.playlist_owner_id = Some(*owner_id);
            playlist.is_private = *is_private;
            playlist.is_album = *is_album;
            playlist.playlist_contents = Some(PlaylistContents {
                track_ids: track_ids
                    .iter()
                    .map(|&track| PlaylistEntry {
                        track,
                        time: block_timestamp,
                    })
                    .collect(),
            });
            playlist.created_at = block_timestamp;
        }
        PlaylistEvent::Deleted { .. } => playlist.is_delete = true,
        PlaylistEvent::TrackAdded { track_id, .. } => {
            playlist
                .playlist_contents
                .get_or_insert_with(PlaylistContents::default)
                .track_ids
                .push(PlaylistEntry {
                    track: *track_id,
                    time: block_timestamp,
                });
        }
        PlaylistEvent::TrackDeleted {
            track_id, timestamp, ..
        } => {
            if let Some(contents) = playlist.playlist_contents.as_mut() {
                if let Some(pos) = contents
                    .track_ids
                    .iter()
                    .position(|e| e.track == *track_id && e.time == *timestamp)
                {
                    contents.track_ids.remove(pos);
                }
            }
        }
        PlaylistEvent::TracksOrdered { track_ids, .. } => {
            let existing = playlist.playlist_contents.take().unwrap_or_default();
            playlist.playlist_contents = Some(reorder(existing, track_ids, block_timestamp));
        }
        PlaylistEvent::NameUpdated { name, .. } => playlist.playlist_name = Some(name.clone()),
        PlaylistEvent::PrivacyUpdated { is_private, .. } => playlist.is_private = *is_private,
        PlaylistEvent::CoverPhotoUpdated { multihash, .. } => {
            let cid = multihash_to_cid(multihash);
            if prefetched.is_blacklisted(&cid) {
                return false;
            }
            playlist.playlist_image_multihash = None;
            playlist.playlist_image_sizes_multihash = Some(cid);
        }
        PlaylistEvent::DescriptionUpdated { description, .. } => {
            playlist.description = Some(description.clone())
        }
        PlaylistEvent::UpcUpdated { upc, .. } => playlist.upc = Some(upc.clone()),
    }
    true
}

/// New order for the playlist. Each track keeps the timestamps it was added
/// with, consumed in order; tracks not previously present are stamped now.
fn reorder(existing: PlaylistContents, order: &[i64], block_timestamp: i64) -> PlaylistContents {
    let mut times: HashMap<i64, VecDeque<i64>> = HashMap::new();
    for entry in existing.track_ids {
        times.entry(entry.track).or_default().push_back(entry.time);
    }
    PlaylistContents {
        track_ids: order
            .iter()
            .map(|&track| PlaylistEntry {
                track,
                time: times
                    .get_mut(&track)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(block_timestamp),
            })
            .collect(),
    }
}
