use std::collections::BTreeMap;

use crate::chain::{ContractEvent, TxReceipt, UserLibraryEvent};
use crate::db::DbError;
use crate::models::{repo, Save, SocialItemType};

use super::social::{playlist_item_type, Action};
use super::{working_copy, ApplierOutput, ApplyContext};

pub async fn apply_user_library(
    ctx: &mut ApplyContext<'_>,
    receipts: &[TxReceipt],
) -> Result<ApplierOutput, DbError> {
    let tx = ctx.tx;
    let block = ctx.block;
    let mut saves: BTreeMap<(i64, i64, SocialItemType), Action> = BTreeMap::new();

    for receipt in receipts {
        for event in &receipt.events {
            let ContractEvent::UserLibrary(event) = event else {
                continue;
            };
            let (key, is_delete) = match event {
                UserLibraryEvent::TrackSaveAdded { user_id, track_id } => {
                    ((*user_id, *track_id, SocialItemType::Track), false)
                }
                UserLibraryEvent::TrackSaveDeleted { user_id, track_id } => {
                    ((*user_id, *track_id, SocialItemType::Track), true)
                }
                UserLibraryEvent::PlaylistSaveAdded { user_id, playlist_id } => {
                    let kind = playlist_item_type(tx, *playlist_id).await?;
                    ((*user_id, *playlist_id, kind), false)
                }
                UserLibraryEvent::PlaylistSaveDeleted { user_id, playlist_id } => {
                    let kind = playlist_item_type(tx, *playlist_id).await?;
                    ((*user_id, *playlist_id, kind), true)
                }
            };
            saves.insert(
                key,
                Action {
                    is_delete,
                    txhash: receipt.tx_hash.clone(),
                },
            );
        }
    }

    let mut output = ApplierOutput::default();
    let mut versions = Vec::with_capacity(saves.len());
    for ((user_id, item_id, kind), action) in saves {
        let mut save = working_copy(
            tx,
            Save::key_for(user_id, item_id, kind),
            ctx.meta(&action.txhash),
            |meta| Save {
                meta,
                user_id,
                save_item_id: item_id,
                save_type: kind,
                is_delete: false,
                created_at: block.timestamp,
            },
        )
        .await?;
        save.is_delete = action.is_delete;
        output.ids.insert(user_id);
        versions.push(save);
    }
    repo::flush_versions(tx, &versions).await?;

    output.changed = versions.len();
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::Store;
    use crate::indexer::appliers::testing::block;
    use crate::indexer::prefetch::Prefetched;
    use crate::indexer::signatures::WalletVerifiers;
    use crate::models::{Entity, Playlist, VersionMeta};

    async fn apply(store: &MemoryStore, number: i64, events: Vec<UserLibraryEvent>) -> ApplierOutput {
        let b = block(number, &format!("0xb{}", number), 50);
        let prefetched = Prefetched::default();
        let verifiers = WalletVerifiers::default();
        let receipts = [TxReceipt {
            tx_hash: format!("0xt{}", number),
            to: None,
            events: events.into_iter().map(ContractEvent::UserLibrary).collect(),
        }];
        let tx = store.begin().await.unwrap();
        let mut ctx = ApplyContext::new(tx.as_ref(), &b, &prefetched, &verifiers);
        let output = apply_user_library(&mut ctx, &receipts).await.unwrap();
        drop(ctx);
        tx.commit().await.unwrap();
        output
    }

    #[tokio::test]
    async fn test_saves_accumulate_per_tuple() {
        let store = MemoryStore::new();
        let output = apply(
            &store,
            1,
            vec![
                UserLibraryEvent::TrackSaveAdded { user_id: 1, track_id: 2 },
                UserLibraryEvent::TrackSaveAdded { user_id: 1, track_id: 3 },
                UserLibraryEvent::TrackSaveDeleted { user_id: 1, track_id: 2 },
            ],
        )
        .await;
        assert_eq!(output.changed, 2);

        let tx = store.begin().await.unwrap();
        let removed: Save = repo::current(tx.as_ref(), Save::key_for(1, 2, SocialItemType::Track))
            .await
            .unwrap()
            .unwrap();
        assert!(removed.is_delete);
    }

    #[tokio::test]
    async fn test_album_save() {
        let store = MemoryStore::new();
        let mut album = Playlist::seed(8, VersionMeta::current("0xb0", 0, "0xt0"), 0);
        album.playlist_owner_id = Some(1);
        album.is_album = true;
        store.seed(Playlist::TABLE.name, album.to_record());

        apply(
            &store,
            1,
            vec![UserLibraryEvent::PlaylistSaveAdded { user_id: 4, playlist_id: 8 }],
        )
        .await;

        let rows = store.rows(Save::TABLE.name);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("save_type").unwrap(), "album");
    }
}
