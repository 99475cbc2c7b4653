//! Off-chain metadata documents referenced by user and track events.

pub mod cid;
mod gateway;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use cid::multihash_to_cid;
pub use gateway::GatewayMetadataClient;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway {gateway} returned {status} for {cid}")]
    Status {
        gateway: String,
        cid: String,
        status: reqwest::StatusCode,
    },

    #[error("Metadata for {cid} is not a JSON object")]
    InvalidDocument { cid: String },

    #[error("Metadata for {0} unavailable from every gateway")]
    Unavailable(String),
}

/// Which document schema a CID is fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    User,
    Track,
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKind::User => f.write_str("user"),
            MetadataKind::Track => f.write_str("track"),
        }
    }
}

/// A field that fails to parse as `T` reads as absent instead of
/// rejecting the whole document.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub profile_picture: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub profile_picture_sizes: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub cover_photo: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub cover_photo_sizes: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub bio: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<String>,
    #[serde(default)]
    pub collectibles: Option<JsonValue>,
    #[serde(default)]
    pub associated_wallets: Option<JsonValue>,
    #[serde(default)]
    pub associated_sol_wallets: Option<JsonValue>,
    #[serde(default)]
    pub playlist_library: Option<JsonValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_deactivated: Option<bool>,
    #[serde(default)]
    pub events: Option<JsonValue>,
}

impl UserMetadata {
    /// True when `collectibles` is a non-empty object.
    pub fn has_collectibles(&self) -> bool {
        matches!(&self.collectibles, Some(JsonValue::Object(map)) if !map.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TrackMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub cover_art: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub cover_art_sizes: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub genre: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub mood: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub license: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub isrc: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_unlisted: Option<bool>,
    #[serde(default)]
    pub track_segments: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    User(UserMetadata),
    Track(TrackMetadata),
}

impl Metadata {
    pub fn parse(kind: MetadataKind, cid: &str, document: JsonValue) -> Result<Self, MetadataError> {
        if !document.is_object() {
            return Err(MetadataError::InvalidDocument {
                cid: cid.to_string(),
            });
        }
        let invalid = |_| MetadataError::InvalidDocument {
            cid: cid.to_string(),
        };
        match kind {
            MetadataKind::User => serde_json::from_value(document)
                .map(Metadata::User)
                .map_err(invalid),
            MetadataKind::Track => serde_json::from_value(document)
                .map(Metadata::Track)
                .map_err(invalid),
        }
    }

    pub fn as_user(&self) -> Option<&UserMetadata> {
        match self {
            Metadata::User(m) => Some(m),
            Metadata::Track(_) => None,
        }
    }

    pub fn as_track(&self) -> Option<&TrackMetadata> {
        match self {
            Metadata::Track(m) => Some(m),
            Metadata::User(_) => None,
        }
    }
}

/// Content-addressed document store.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch(&self, cid: &str, kind: MetadataKind) -> Result<Metadata, MetadataError>;
}

#[cfg(test)]
pub mod fake {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeMetadata {
        documents: Mutex<HashMap<String, JsonValue>>,
        failing: Mutex<HashSet<String>>,
        pub fetched: Mutex<Vec<String>>,
    }

    impl FakeMetadata {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, cid: &str, document: JsonValue) {
            self.documents
                .lock()
                .unwrap()
                .insert(cid.to_string(), document);
        }

        pub fn fail(&self, cid: &str) {
            self.failing.lock().unwrap().insert(cid.to_string());
        }
    }

    #[async_trait]
    impl MetadataClient for FakeMetadata {
        async fn fetch(&self, cid: &str, kind: MetadataKind) -> Result<Metadata, MetadataError> {
            self.fetched.lock().unwrap().push(cid.to_string());
            if self.failing.lock().unwrap().contains(cid) {
                return Err(MetadataError::Unavailable(cid.to_string()));
            }
            let document = self
                .documents
                .lock()
                .unwrap()
                .get(cid)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            Metadata::parse(kind, cid, document)
        }
    }
}
