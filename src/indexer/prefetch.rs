use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::chain::{ChainBlock, ContractEvent, ContractKind, PlaylistEvent, TrackEvent, UserEvent};
use crate::db::StoreTransaction;
use crate::metadata::{
    multihash_to_cid, Metadata, MetadataClient, MetadataKind, TrackMetadata, UserMetadata,
};
use crate::models::is_blacklisted;

use super::error::{IndexingError, Stage};
use super::partition::PartitionedBlock;
use super::pool::{run_bounded, GroupError};

pub const METADATA_WORKERS: usize = 8;

/// Metadata documents resolved ahead of the appliers.
#[derive(Debug, Default)]
pub struct Prefetched {
    metadata: HashMap<String, Metadata>,
    blacklisted: HashSet<String>,
}

impl Prefetched {
    pub fn is_blacklisted(&self, cid: &str) -> bool {
        self.blacklisted.contains(cid)
    }

    pub fn user(&self, cid: &str) -> Option<&UserMetadata> {
        self.metadata.get(cid).and_then(Metadata::as_user)
    }

    pub fn track(&self, cid: &str) -> Option<&TrackMetadata> {
        self.metadata.get(cid).and_then(Metadata::as_track)
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    #[cfg(test)]
    pub fn with_user(mut self, cid: &str, metadata: UserMetadata) -> Self {
        self.metadata.insert(cid.to_string(), Metadata::User(metadata));
        self
    }

    #[cfg(test)]
    pub fn with_track(mut self, cid: &str, metadata: TrackMetadata) -> Self {
        self.metadata.insert(cid.to_string(), Metadata::Track(metadata));
        self
    }

    #[cfg(test)]
    pub fn with_blacklisted(mut self, cid: &str) -> Self {
        self.blacklisted.insert(cid.to_string());
        self
    }
}

/// Every metadata CID referenced by the block, first occurrence wins.
fn referenced_cids(block: &PartitionedBlock) -> BTreeMap<String, (MetadataKind, String)> {
    let mut cids = BTreeMap::new();
    for receipt in block.receipts(ContractKind::User) {
        for event in &receipt.events {
            if let ContractEvent::User(UserEvent::UpdateMultihash { multihash, .. }) = event {
                cids.entry(multihash_to_cid(multihash))
                    .or_insert((MetadataKind::User, receipt.tx_hash.clone()));
            }
        }
    }
    for receipt in block.receipts(ContractKind::Track) {
        for event in &receipt.events {
            match event {
                ContractEvent::Track(TrackEvent::NewTrack { multihash, .. })
                | ContractEvent::Track(TrackEvent::UpdateTrack { multihash, .. }) => {
                    cids.entry(multihash_to_cid(multihash))
                        .or_insert((MetadataKind::Track, receipt.tx_hash.clone()));
                }
                _ => {}
            }
        }
    }
    cids
}

/// Image CIDs set by the block. These are never fetched, only checked
/// against the blacklist.
fn referenced_images(block: &PartitionedBlock) -> BTreeMap<String, String> {
    let mut images = BTreeMap::new();
    let receipts = block
        .receipts(ContractKind::User)
        .iter()
        .chain(block.receipts(ContractKind::Playlist));
    for receipt in receipts {
        for event in &receipt.events {
            let multihash = match event {
                ContractEvent::User(UserEvent::UpdateProfilePhoto { multihash, .. })
                | ContractEvent::User(UserEvent::UpdateCoverPhoto { multihash, .. })
                | ContractEvent::Playlist(PlaylistEvent::CoverPhotoUpdated { multihash, .. }) => {
                    multihash
                }
                _ => continue,
            };
            images
                .entry(multihash_to_cid(multihash))
                .or_insert_with(|| receipt.tx_hash.clone());
        }
    }
    images
}

struct FetchFailure {
    tx_hash: String,
    message: String,
}

pub async fn prefetch_metadata(
    tx: &dyn StoreTransaction,
    client: &Arc<dyn MetadataClient>,
    block: &ChainBlock,
    partitioned: &PartitionedBlock,
) -> Result<Prefetched, IndexingError> {
    let mut prefetched = Prefetched::default();
    let mut pending = Vec::new();

    for (cid, (kind, tx_hash)) in referenced_cids(partitioned) {
        let blacklisted = is_blacklisted(tx, &cid).await.map_err(|e| {
            IndexingError::new(Stage::PrefetchMetadata, block, tx_hash.clone(), e)
        })?;
        if blacklisted {
            tracing::info!("Skipping blacklisted metadata {} in tx {}", cid, tx_hash);
            prefetched.blacklisted.insert(cid);
        } else {
            pending.push((cid, kind, tx_hash));
        }
    }

    for (cid, tx_hash) in referenced_images(partitioned) {
        let blacklisted = is_blacklisted(tx, &cid).await.map_err(|e| {
            IndexingError::new(Stage::PrefetchMetadata, block, tx_hash.clone(), e)
        })?;
        if blacklisted {
            prefetched.blacklisted.insert(cid);
        }
    }

    if pending.is_empty() {
        return Ok(prefetched);
    }
    let requested = pending.len();

    let documents = run_bounded(pending, METADATA_WORKERS, |(cid, kind, tx_hash)| {
        let client = client.clone();
        async move {
            match client.fetch(&cid, kind).await {
                Ok(document) => Ok((cid, document)),
                Err(e) => Err(FetchFailure {
                    tx_hash,
                    message: format!("failed to fetch {} metadata {}: {}", kind, cid, e),
                }),
            }
        }
    })
    .await
    .map_err(|e| match e {
        GroupError::Failed(f) => {
            IndexingError::new(Stage::PrefetchMetadata, block, f.tx_hash, f.message)
        }
        GroupError::Panicked(msg) => IndexingError::new(
            Stage::PrefetchMetadata,
            block,
            String::new(),
            format!("metadata task panicked: {}", msg),
        ),
    })?;

    prefetched.metadata.extend(documents);
    tracing::info!(
        "Prefetched {}/{} metadata documents for block {}",
        prefetched.len(),
        requested,
        block.number
    );
    Ok(prefetched)
}
