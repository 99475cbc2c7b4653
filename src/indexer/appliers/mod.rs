//! Per-contract state appliers.
//!
//! Each applier folds one contract's events for a block onto working copies
//! of the affected entities, then persists them with the two-phase flip.
//! Events are applied one at a time to a clone of the working copy; a clone
//! that fails validation is discarded and its transaction recorded as a
//! node-level skip.

mod playlists;
mod replica_set;
mod social;
mod track_routes;
mod tracks;
mod user_events;
mod user_library;
mod users;
mod wallets;

use std::collections::BTreeSet;

use crate::chain::ChainBlock;
use crate::db::{DbError, StoreTransaction, WhereClause};
use crate::models::{repo, SkipLevel, SkippedTransaction, VersionMeta, Versioned};

use super::challenges::ChallengeEvent;
use super::prefetch::Prefetched;
use super::signatures::WalletVerifiers;

pub use playlists::apply_playlists;
pub use replica_set::apply_replica_sets;
pub use social::apply_social_features;
pub use tracks::apply_tracks;
pub use user_library::apply_user_library;
pub use users::apply_users;

/// Signals collected while applying a block, released only after commit.
#[derive(Debug, Default)]
pub struct BlockEffects {
    pub challenge_events: Vec<ChallengeEvent>,
    pub balance_refresh: BTreeSet<i64>,
    /// Transactions dropped by local validation.
    pub node_skipped: BTreeSet<String>,
}

pub struct ApplyContext<'a> {
    pub tx: &'a dyn StoreTransaction,
    pub block: &'a ChainBlock,
    pub prefetched: &'a Prefetched,
    pub verifiers: &'a WalletVerifiers,
    pub effects: BlockEffects,
}

impl<'a> ApplyContext<'a> {
    pub fn new(
        tx: &'a dyn StoreTransaction,
        block: &'a ChainBlock,
        prefetched: &'a Prefetched,
        verifiers: &'a WalletVerifiers,
    ) -> Self {
        Self {
            tx,
            block,
            prefetched,
            verifiers,
            effects: BlockEffects::default(),
        }
    }

    /// Version metadata for a row produced by `txhash` in this block.
    fn meta(&self, txhash: &str) -> VersionMeta {
        VersionMeta::current(&self.block.hash, self.block.number, txhash)
    }

    /// Log and persist a validation failure, once per transaction.
    async fn skip_transaction(
        &mut self,
        txhash: &str,
        entity: &str,
        entity_id: i64,
        missing: &str,
    ) -> Result<(), DbError> {
        tracing::warn!(
            "Dropping tx {} in block {}: {} {} is missing required field {}",
            txhash,
            self.block.number,
            entity,
            entity_id,
            missing
        );
        if self.effects.node_skipped.insert(txhash.to_string()) {
            SkippedTransaction {
                blocknumber: self.block.number,
                blockhash: self.block.hash.clone(),
                txhash: txhash.to_string(),
                level: SkipLevel::Node,
            }
            .record(self.tx)
            .await?;
        }
        Ok(())
    }
}

/// What an applier changed.
#[derive(Debug, Default, PartialEq)]
pub struct ApplierOutput {
    pub changed: usize,
    pub ids: BTreeSet<i64>,
}

/// A new unpersisted version of the entity at `key`: a copy of its current
/// row when one exists, otherwise `seed`.
async fn working_copy<T, F>(
    tx: &dyn StoreTransaction,
    key: WhereClause,
    meta: VersionMeta,
    seed: F,
) -> Result<T, DbError>
where
    T: Versioned,
    F: FnOnce(VersionMeta) -> T,
{
    Ok(match repo::current::<T>(tx, key).await? {
        Some(row) => row.new_version(meta),
        None => seed(meta),
    })
}
