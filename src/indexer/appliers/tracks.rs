use std::collections::BTreeMap;

use crate::chain::{ContractEvent, TrackEvent, TxReceipt};
use crate::db::DbError;
use crate::metadata::{multihash_to_cid, TrackMetadata};
use crate::models::{repo, Track};

use super::track_routes::update_track_routes;
use super::{working_copy, ApplierOutput, ApplyContext};

pub async fn apply_tracks(
    ctx: &mut ApplyContext<'_>,
    receipts: &[TxReceipt],
) -> Result<ApplierOutput, DbError> {
    let prefetched = ctx.prefetched;
    let block = ctx.block;
    let mut working: BTreeMap<i64, Track> = BTreeMap::new();
    let mut output = ApplierOutput::default();

    for receipt in receipts {
        for event in &receipt.events {
            let ContractEvent::Track(event) = event else {
                continue;
            };
            let track_id = event.track_id();

            let mut candidate = match working.get(&track_id) {
                Some(track) => track.clone(),
                None => {
                    working_copy(
                        ctx.tx,
                        Track::key_for(track_id),
                        ctx.meta(&receipt.tx_hash),
                        |meta| Track::seed(track_id, meta, block.timestamp),
                    )
                    .await?
                }
            };
            candidate.meta.txhash = receipt.tx_hash.clone();

            match event {
                TrackEvent::NewTrack {
                    owner_id,
                    multihash,
                    ..
                }
                | TrackEvent::UpdateTrack {
                    owner_id,
                    multihash,
                    ..
                } => {
                    let cid = multihash_to_cid(multihash);
                    if prefetched.is_blacklisted(&cid) {
                        tracing::info!(
                            "Dropped track {} update in tx {}: blacklisted metadata {}",
                            track_id,
                            receipt.tx_hash,
                            cid
                        );
                        continue;
                    }
                    candidate.owner_id = Some(*owner_id);
                    if let Some(metadata) = prefetched.track(&cid) {
                        apply_metadata(&mut candidate, metadata);
                    }
                    candidate.metadata_multihash = Some(cid);
                }
                TrackEvent::TrackDeleted { .. } => candidate.is_delete = true,
            }
            candidate.updated_at = block.timestamp;
            if let Some(cover_art) = candidate.cover_art.take() {
                candidate.cover_art_sizes = Some(cover_art);
            }

            if let Some(missing) = candidate.missing_required_field() {
                ctx.skip_transaction(&receipt.tx_hash, "track", track_id, missing)
                    .await?;
                continue;
            }
            working.insert(track_id, candidate);
            output.changed += 1;
        }
    }

    let versions: Vec<Track> = working.into_values().collect();
    repo::flush_versions(ctx.tx, &versions).await?;
    update_track_routes(ctx, &versions).await?;

    output.ids.extend(versions.iter().map(|t| t.track_id));
    Ok(output)
}

fn apply_metadata(track: &mut Track, metadata: &TrackMetadata) {
    let fields = [
        (&mut track.title, &metadata.title),
        (&mut track.cover_art, &metadata.cover_art),
        (&mut track.genre, &metadata.genre),
        (&mut track.mood, &metadata.mood),
        (&mut track.tags, &metadata.tags),
        (&mut track.description, &metadata.description),
        (&mut track.license, &metadata.license),
        (&mut track.isrc, &metadata.isrc),
    ];
    for (field, value) in fields {
        if value.is_some() {
            *field = value.clone();
        }
    }
    if let Some(sizes) = &metadata.cover_art_sizes {
        track.cover_art = Some(sizes.clone());
    }
    if let Some(is_unlisted) = metadata.is_unlisted {
        track.is_unlisted = is_unlisted;
    }
    if metadata.track_segments.is_some() {
        track.track_segments = metadata.track_segments.clone();
    }
}
