use serde::{Deserialize, Serialize};

use crate::db::{DbError, DbValue, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub track: i64,
    pub time: i64,
}

/// Stored as `{"track_ids": [{"track": .., "time": ..}, ..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaylistContents {
    pub track_ids: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playlist {
    pub meta: VersionMeta,
    pub playlist_id: i64,
    pub playlist_owner_id: Option<i64>,
    pub is_album: bool,
    pub is_private: bool,
    pub playlist_name: Option<String>,
    pub playlist_contents: Option<PlaylistContents>,
    pub playlist_image_multihash: Option<String>,
    pub playlist_image_sizes_multihash: Option<String>,
    pub description: Option<String>,
    pub upc: Option<String>,
    pub is_delete: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Playlist {
    pub fn seed(playlist_id: i64, meta: VersionMeta, block_timestamp: i64) -> Self {
        Self {
            meta,
            playlist_id,
            created_at: block_timestamp,
            updated_at: block_timestamp,
            ..Default::default()
        }
    }

    pub fn key_for(playlist_id: i64) -> WhereClause {
        WhereClause::eq("playlist_id", playlist_id)
    }

    pub fn missing_required_field(&self) -> Option<&'static str> {
        match self.playlist_owner_id {
            Some(_) => None,
            None => Some("playlist_owner_id"),
        }
    }
}

impl Entity for Playlist {
    const TABLE: &'static TableSpec = versioned_table!(
        "playlists",
        [
            ("playlist_id", Int64),
            ("playlist_owner_id", Int64),
            ("is_album", Bool),
            ("is_private", Bool),
            ("playlist_name", Text),
            ("playlist_contents", Json),
            ("playlist_image_multihash", Text),
            ("playlist_image_sizes_multihash", Text),
            ("description", Text),
            ("upc", Text),
            ("is_delete", Bool),
            ("created_at", Int64),
            ("updated_at", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        let mut record = self
            .meta
            .write(Record::new())
            .with("playlist_id", self.playlist_id);
        record.set("playlist_owner_id", DbValue::opt_int(self.playlist_owner_id));
        record.set("playlist_name", DbValue::opt_text(&self.playlist_name));
        let contents = self
            .playlist_contents
            .as_ref()
            .and_then(|c| serde_json::to_value(c).ok());
        record.set("playlist_contents", DbValue::opt_json(&contents));
        record.set(
            "playlist_image_multihash",
            DbValue::opt_text(&self.playlist_image_multihash),
        );
        record.set(
            "playlist_image_sizes_multihash",
            DbValue::opt_text(&self.playlist_image_sizes_multihash),
        );
        record.set("description", DbValue::opt_text(&self.description));
        record.set("upc", DbValue::opt_text(&self.upc));
        record
            .with("is_album", self.is_album)
            .with("is_private", self.is_private)
            .with("is_delete", self.is_delete)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        let playlist_contents = match record.opt_json("playlist_contents")? {
            Some(value) => Some(
                serde_json::from_value(value).map_err(|e| DbError::Encode(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            meta: VersionMeta::read(record)?,
            playlist_id: record.int("playlist_id")?,
            playlist_owner_id: record.opt_int("playlist_owner_id")?,
            is_album: record.flag("is_album")?,
            is_private: record.flag("is_private")?,
            playlist_name: record.opt_text("playlist_name")?,
            playlist_contents,
            playlist_image_multihash: record.opt_text("playlist_image_multihash")?,
            playlist_image_sizes_multihash: record.opt_text("playlist_image_sizes_multihash")?,
            description: record.opt_text("description")?,
            upc: record.opt_text("upc")?,
            is_delete: record.flag("is_delete")?,
            created_at: record.int("created_at")?,
            updated_at: record.int("updated_at")?,
        })
    }
}

impl Versioned for Playlist {
    fn key(&self) -> WhereClause {
        Self::key_for(self.playlist_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
