use std::fmt;
use std::str::FromStr;

use crate::db::{DbError, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

/// Target kind of a repost or save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocialItemType {
    Track,
    Playlist,
    Album,
}

impl SocialItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialItemType::Track => "track",
            SocialItemType::Playlist => "playlist",
            SocialItemType::Album => "album",
        }
    }
}

impl fmt::Display for SocialItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialItemType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "track" => Ok(SocialItemType::Track),
            "playlist" => Ok(SocialItemType::Playlist),
            "album" => Ok(SocialItemType::Album),
            other => Err(DbError::Encode(format!("unknown item type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Follow {
    pub meta: VersionMeta,
    pub follower_user_id: i64,
    pub followee_user_id: i64,
    pub is_delete: bool,
    pub created_at: i64,
}

impl Follow {
    pub fn key_for(follower_user_id: i64, followee_user_id: i64) -> WhereClause {
        WhereClause::eq("follower_user_id", follower_user_id)
            .and(WhereClause::eq("followee_user_id", followee_user_id))
    }
}

impl Entity for Follow {
    const TABLE: &'static TableSpec = versioned_table!(
        "follows",
        [
            ("follower_user_id", Int64),
            ("followee_user_id", Int64),
            ("is_delete", Bool),
            ("created_at", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        self.meta
            .write(Record::new())
            .with("follower_user_id", self.follower_user_id)
            .with("followee_user_id", self.followee_user_id)
            .with("is_delete", self.is_delete)
            .with("created_at", self.created_at)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            follower_user_id: record.int("follower_user_id")?,
            followee_user_id: record.int("followee_user_id")?,
            is_delete: record.flag("is_delete")?,
            created_at: record.int("created_at")?,
        })
    }
}

impl Versioned for Follow {
    fn key(&self) -> WhereClause {
        Self::key_for(self.follower_user_id, self.followee_user_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repost {
    pub meta: VersionMeta,
    pub user_id: i64,
    pub repost_item_id: i64,
    pub repost_type: SocialItemType,
    pub is_delete: bool,
    pub created_at: i64,
}

impl Repost {
    pub fn key_for(user_id: i64, repost_item_id: i64, repost_type: SocialItemType) -> WhereClause {
        WhereClause::eq("user_id", user_id)
            .and(WhereClause::eq("repost_item_id", repost_item_id))
            .and(WhereClause::eq("repost_type", repost_type.as_str()))
    }
}

impl Entity for Repost {
    const TABLE: &'static TableSpec = versioned_table!(
        "reposts",
        [
            ("user_id", Int64),
            ("repost_item_id", Int64),
            ("repost_type", Text),
            ("is_delete", Bool),
            ("created_at", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        self.meta
            .write(Record::new())
            .with("user_id", self.user_id)
            .with("repost_item_id", self.repost_item_id)
            .with("repost_type", self.repost_type.as_str())
            .with("is_delete", self.is_delete)
            .with("created_at", self.created_at)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            user_id: record.int("user_id")?,
            repost_item_id: record.int("repost_item_id")?,
            repost_type: record.text("repost_type")?.parse()?,
            is_delete: record.flag("is_delete")?,
            created_at: record.int("created_at")?,
        })
    }
}

impl Versioned for Repost {
    fn key(&self) -> WhereClause {
        Self::key_for(self.user_id, self.repost_item_id, self.repost_type)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Save {
    pub meta: VersionMeta,
    pub user_id: i64,
    pub save_item_id: i64,
    pub save_type: SocialItemType,
    pub is_delete: bool,
    pub created_at: i64,
}

impl Save {
    pub fn key_for(user_id: i64, save_item_id: i64, save_type: SocialItemType) -> WhereClause {
        WhereClause::eq("user_id", user_id)
            .and(WhereClause::eq("save_item_id", save_item_id))
            .and(WhereClause::eq("save_type", save_type.as_str()))
    }
}

impl Entity for Save {
    const TABLE: &'static TableSpec = versioned_table!(
        "saves",
        [
            ("user_id", Int64),
            ("save_item_id", Int64),
            ("save_type", Text),
            ("is_delete", Bool),
            ("created_at", Int64),
        ]
    );

    fn to_record(&self) -> Record {
        self.meta
            .write(Record::new())
            .with("user_id", self.user_id)
            .with("save_item_id", self.save_item_id)
            .with("save_type", self.save_type.as_str())
            .with("is_delete", self.is_delete)
            .with("created_at", self.created_at)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            user_id: record.int("user_id")?,
            save_item_id: record.int("save_item_id")?,
            save_type: record.text("save_type")?.parse()?,
            is_delete: record.flag("is_delete")?,
            created_at: record.int("created_at")?,
        })
    }
}

impl Versioned for Save {
    fn key(&self) -> WhereClause {
        Self::key_for(self.user_id, self.save_item_id, self.save_type)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
