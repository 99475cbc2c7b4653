//! Row types for the versioned projection tables.
//!
//! Every versioned row carries a [`VersionMeta`]: the block and transaction
//! that produced it, plus the `is_current` flag. A logical entity (a user, a
//! follow edge, ...) is identified by [`Versioned::key`]; a single row is
//! identified by that key plus its block hash.

/// `TableSpec` for a versioned table: the four version columns followed by
/// the entity's own columns.
macro_rules! versioned_table {
    ($name:literal, [$(($col:literal, $ty:ident)),* $(,)?]) => {
        &crate::db::TableSpec {
            name: $name,
            columns: &[
                crate::db::ColumnSpec { name: "blockhash", ty: crate::db::ColumnType::Text },
                crate::db::ColumnSpec { name: "blocknumber", ty: crate::db::ColumnType::Int64 },
                crate::db::ColumnSpec { name: "txhash", ty: crate::db::ColumnType::Text },
                crate::db::ColumnSpec { name: "is_current", ty: crate::db::ColumnType::Bool },
                $(crate::db::ColumnSpec { name: $col, ty: crate::db::ColumnType::$ty }),*
            ],
        }
    };
}

mod blacklist;
mod block;
mod playlist;
pub mod repo;
mod skipped;
mod social;
mod track;
mod ursm;
mod user;
mod user_events;
mod wallet;

pub use blacklist::{is_blacklisted, IpldBlacklist};
pub use block::BlockRow;
pub use playlist::{Playlist, PlaylistContents, PlaylistEntry};
pub use skipped::{SkipLevel, SkippedTransaction};
pub use social::{Follow, Repost, Save, SocialItemType};
pub use track::{Track, TrackRoute};
pub use ursm::UrsmContentNode;
pub use user::User;
pub use user_events::UserEvents;
pub use wallet::{AssociatedWallet, WalletChain};

use crate::db::{DbError, Record, TableSpec, WhereClause};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionMeta {
    pub blockhash: String,
    pub blocknumber: i64,
    pub txhash: String,
    pub is_current: bool,
}

impl VersionMeta {
    /// Metadata for a new current row produced by `txhash` in the given block.
    pub fn current(blockhash: &str, blocknumber: i64, txhash: &str) -> Self {
        Self {
            blockhash: blockhash.to_string(),
            blocknumber,
            txhash: txhash.to_string(),
            is_current: true,
        }
    }

    fn read(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            blockhash: record.text("blockhash")?,
            blocknumber: record.int("blocknumber")?,
            txhash: record.text("txhash")?,
            is_current: record.flag("is_current")?,
        })
    }

    fn write(&self, record: Record) -> Record {
        record
            .with("blockhash", self.blockhash.as_str())
            .with("blocknumber", self.blocknumber)
            .with("txhash", self.txhash.as_str())
            .with("is_current", self.is_current)
    }
}

pub trait Entity: Sized + Clone + Send + Sync + 'static {
    const TABLE: &'static TableSpec;

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self, DbError>;
}

pub trait Versioned: Entity {
    /// Filter selecting every row of this logical entity.
    fn key(&self) -> WhereClause;

    fn meta(&self) -> &VersionMeta;

    fn meta_mut(&mut self) -> &mut VersionMeta;

    /// Copy constructor for a working copy: same field values, new version
    /// identity. The stored row this was read from is never touched.
    fn new_version(&self, meta: VersionMeta) -> Self {
        let mut next = self.clone();
        *next.meta_mut() = meta;
        next
    }

    /// Filter selecting exactly this row.
    fn row_key(&self) -> WhereClause {
        self.key()
            .and(WhereClause::eq("blockhash", self.meta().blockhash.as_str()))
    }
}
