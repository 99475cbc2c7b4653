use serde_json::Value as JsonValue;

use crate::db::{DbError, DbValue, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub meta: VersionMeta,
    pub track_id: i64,
    pub owner_id: Option<i64>,
    pub title: Option<String>,
    pub metadata_multihash: Option<String>,
    pub cover_art: Option<String>,
    pub cover_art_sizes: Option<String>,
    pub genre: Option<String>,
    pub mood: Option<String>,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub isrc: Option<String>,
    pub is_unlisted: bool,
    pub track_segments: Option<JsonValue>,
    pub is_delete: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Track {
    pub fn seed(track_id: i64, meta: VersionMeta, block_timestamp: i64) -> Self {
        Self {
            meta,
            track_id,
            created_at: block_timestamp,
            updated_at: block_timestamp,
            ..Default::default()
        }
    }

    pub fn key_for(track_id: i64) -> WhereClause {
        WhereClause::eq("track_id", track_id)
    }

    pub fn missing_required_field(&self) -> Option<&'static str> {
        match self.owner_id {
            Some(_) => None,
            None => Some("owner_id"),
        }
    }
}

impl Entity for Track {
    const TABLE: &'static TableSpec = versioned_table!(
        "tracks",
        [
            ("track_id", Int64),
            ("owner_id", Int64),
            ("title", Text),
            ("metadata_multihash", Text),
            ("cover_art", Text),
            ("cover_art_sizes", Text),
            ("genre", Text),
            ("mood", Text),
            ("tags", Text),
            ("description", Text),
            ("license", Text),
            ("isrc", Text),
            ("is_unlisted", Bool),
            ("track_segments", Json),
            ("is_delete", Bool),
            ("created_at", Int64),
            ("updated_at", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        let mut record = self.meta.write(Record::new()).with("track_id", self.track_id);
        record.set("owner_id", DbValue::opt_int(self.owner_id));
        record.set("title", DbValue::opt_text(&self.title));
        record.set("metadata_multihash", DbValue::opt_text(&self.metadata_multihash));
        record.set("cover_art", DbValue::opt_text(&self.cover_art));
        record.set("cover_art_sizes", DbValue::opt_text(&self.cover_art_sizes));
        record.set("genre", DbValue::opt_text(&self.genre));
        record.set("mood", DbValue::opt_text(&self.mood));
        record.set("tags", DbValue::opt_text(&self.tags));
        record.set("description", DbValue::opt_text(&self.description));
        record.set("license", DbValue::opt_text(&self.license));
        record.set("isrc", DbValue::opt_text(&self.isrc));
        record.set("track_segments", DbValue::opt_json(&self.track_segments));
        record
            .with("is_unlisted", self.is_unlisted)
            .with("is_delete", self.is_delete)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            track_id: record.int("track_id")?,
            owner_id: record.opt_int("owner_id")?,
            title: record.opt_text("title")?,
            metadata_multihash: record.opt_text("metadata_multihash")?,
            cover_art: record.opt_text("cover_art")?,
            cover_art_sizes: record.opt_text("cover_art_sizes")?,
            genre: record.opt_text("genre")?,
            mood: record.opt_text("mood")?,
            tags: record.opt_text("tags")?,
            description: record.opt_text("description")?,
            license: record.opt_text("license")?,
            isrc: record.opt_text("isrc")?,
            is_unlisted: record.flag("is_unlisted")?,
            track_segments: record.opt_json("track_segments")?,
            is_delete: record.flag("is_delete")?,
            created_at: record.int("created_at")?,
            updated_at: record.int("updated_at")?,
        })
    }
}

impl Versioned for Track {
    fn key(&self) -> WhereClause {
        Self::key_for(self.track_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}

/// Human-readable URL slug of a track.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackRoute {
    pub meta: VersionMeta,
    pub track_id: i64,
    pub owner_id: i64,
    pub slug: String,
    pub title_slug: String,
    pub collision_id: i64,
}

impl TrackRoute {
    pub fn key_for(track_id: i64) -> WhereClause {
        WhereClause::eq("track_id", track_id)
    }
}

impl Entity for TrackRoute {
    const TABLE: &'static TableSpec = versioned_table!(
        "track_routes",
        [
            ("track_id", Int64),
            ("owner_id", Int64),
            ("slug", Text),
            ("title_slug", Text),
            ("collision_id", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        self.meta
            .write(Record::new())
            .with("track_id", self.track_id)
            .with("owner_id", self.owner_id)
            .with("slug", self.slug.as_str())
            .with("title_slug", self.title_slug.as_str())
            .with("collision_id", self.collision_id)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            track_id: record.int("track_id")?,
            owner_id: record.int("owner_id")?,
            slug: record.text("slug")?,
            title_slug: record.text("title_slug")?,
            collision_id: record.int("collision_id")?,
        })
    }
}

impl Versioned for TrackRoute {
    fn key(&self) -> WhereClause {
        Self::key_for(self.track_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
