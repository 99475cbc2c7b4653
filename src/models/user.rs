use serde_json::Value as JsonValue;

use crate::db::{DbError, DbValue, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub meta: VersionMeta,
    pub user_id: i64,
    pub handle: Option<String>,
    pub handle_lc: Option<String>,
    pub wallet: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub profile_picture_sizes: Option<String>,
    pub cover_photo: Option<String>,
    pub cover_photo_sizes: Option<String>,
    pub metadata_multihash: Option<String>,
    pub creator_node_endpoint: Option<String>,
    pub is_creator: bool,
    pub is_verified: bool,
    pub is_deactivated: bool,
    pub has_collectibles: bool,
    pub playlist_library: Option<JsonValue>,
    pub primary_id: Option<i64>,
    pub secondary_ids: Option<JsonValue>,
    pub replica_set_update_signer: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    /// Fresh entity for a user id with no stored history.
    pub fn seed(user_id: i64, meta: VersionMeta, block_timestamp: i64) -> Self {
        Self {
            meta,
            user_id,
            created_at: block_timestamp,
            updated_at: block_timestamp,
            ..Default::default()
        }
    }

    pub fn key_for(user_id: i64) -> WhereClause {
        WhereClause::eq("user_id", user_id)
    }

    /// Users migrated to replica sets no longer take legacy endpoint updates.
    pub fn has_replica_set(&self) -> bool {
        self.primary_id.is_some_and(|id| id > 0)
    }

    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.handle.as_deref().map_or(true, str::is_empty) {
            return Some("handle");
        }
        if self.wallet.as_deref().map_or(true, str::is_empty) {
            return Some("wallet");
        }
        None
    }
}

impl Entity for User {
    const TABLE: &'static TableSpec = versioned_table!(
        "users",
        [
            ("user_id", Int64),
            ("handle", Text),
            ("handle_lc", Text),
            ("wallet", Text),
            ("name", Text),
            ("location", Text),
            ("bio", Text),
            ("profile_picture", Text),
            ("profile_picture_sizes", Text),
            ("cover_photo", Text),
            ("cover_photo_sizes", Text),
            ("metadata_multihash", Text),
            ("creator_node_endpoint", Text),
            ("is_creator", Bool),
            ("is_verified", Bool),
            ("is_deactivated", Bool),
            ("has_collectibles", Bool),
            ("playlist_library", Json),
            ("primary_id", Int64),
            ("secondary_ids", Json),
            ("replica_set_update_signer", Text),
            ("created_at", Int64),
            ("updated_at", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        let mut record = self.meta.write(Record::new()).with("user_id", self.user_id);
        record.set("handle", DbValue::opt_text(&self.handle));
        record.set("handle_lc", DbValue::opt_text(&self.handle_lc));
        record.set("wallet", DbValue::opt_text(&self.wallet));
        record.set("name", DbValue::opt_text(&self.name));
        record.set("location", DbValue::opt_text(&self.location));
        record.set("bio", DbValue::opt_text(&self.bio));
        record.set("profile_picture", DbValue::opt_text(&self.profile_picture));
        record.set(
            "profile_picture_sizes",
            DbValue::opt_text(&self.profile_picture_sizes),
        );
        record.set("cover_photo", DbValue::opt_text(&self.cover_photo));
        record.set("cover_photo_sizes", DbValue::opt_text(&self.cover_photo_sizes));
        record.set("metadata_multihash", DbValue::opt_text(&self.metadata_multihash));
        record.set(
            "creator_node_endpoint",
            DbValue::opt_text(&self.creator_node_endpoint),
        );
        record.set("playlist_library", DbValue::opt_json(&self.playlist_library));
        record.set("primary_id", DbValue::opt_int(self.primary_id));
        record.set("secondary_ids", DbValue::opt_json(&self.secondary_ids));
        record.set(
            "replica_set_update_signer",
            DbValue::opt_text(&self.replica_set_update_signer),
        );
        record
            .with("is_creator", self.is_creator)
            .with("is_verified", self.is_verified)
            .with("is_deactivated", self.is_deactivated)
            .with("has_collectibles", self.has_collectibles)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            user_id: record.int("user_id")?,
            handle: record.opt_text("handle")?,
            handle_lc: record.opt_text("handle_lc")?,
            wallet: record.opt_text("wallet")?,
            name: record.opt_text("name")?,
            location: record.opt_text("location")?,
            bio: record.opt_text("bio")?,
            profile_picture: record.opt_text("profile_picture")?,
            profile_picture_sizes: record.opt_text("profile_picture_sizes")?,
            cover_photo: record.opt_text("cover_photo")?,
            cover_photo_sizes: record.opt_text("cover_photo_sizes")?,
            metadata_multihash: record.opt_text("metadata_multihash")?,
            creator_node_endpoint: record.opt_text("creator_node_endpoint")?,
            is_creator: record.flag("is_creator")?,
            is_verified: record.flag("is_verified")?,
            is_deactivated: record.flag("is_deactivated")?,
            has_collectibles: record.flag("has_collectibles")?,
            playlist_library: record.opt_json("playlist_library")?,
            primary_id: record.opt_int("primary_id")?,
            secondary_ids: record.opt_json("secondary_ids")?,
            replica_set_update_signer: record.opt_text("replica_set_update_signer")?,
            created_at: record.int("created_at")?,
            updated_at: record.int("updated_at")?,
        })
    }
}

impl Versioned for User {
    fn key(&self) -> WhereClause {
        Self::key_for(self.user_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
