//! Typed domain events, one closed enum per indexed contract.

/// A content multihash as emitted on chain: the 32-byte digest plus the
/// hash function code and digest length that prefix it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multihash {
    pub digest: [u8; 32],
    pub hash_fn: u8,
    pub size: u8,
}

impl Multihash {
    /// sha2-256 multihash, the format used by every user-factory digest.
    pub fn sha256(digest: [u8; 32]) -> Self {
        Self {
            digest,
            hash_fn: 0x12,
            size: 0x20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    AddUser { user_id: i64, handle: String, wallet: String },
    UpdateMultihash { user_id: i64, multihash: Multihash },
    UpdateName { user_id: i64, name: String },
    UpdateLocation { user_id: i64, location: String },
    UpdateBio { user_id: i64, bio: String },
    UpdateProfilePhoto { user_id: i64, multihash: Multihash },
    UpdateCoverPhoto { user_id: i64, multihash: Multihash },
    UpdateIsCreator { user_id: i64, is_creator: bool },
    UpdateIsVerified { user_id: i64, is_verified: bool },
    UpdateCreatorNodeEndpoint { user_id: i64, endpoint: String },
}

impl UserEvent {
    pub fn user_id(&self) -> i64 {
        match self {
            UserEvent::AddUser { user_id, .. }
            | UserEvent::UpdateMultihash { user_id, .. }
            | UserEvent::UpdateName { user_id, .. }
            | UserEvent::UpdateLocation { user_id, .. }
            | UserEvent::UpdateBio { user_id, .. }
            | UserEvent::UpdateProfilePhoto { user_id, .. }
            | UserEvent::UpdateCoverPhoto { user_id, .. }
            | UserEvent::UpdateIsCreator { user_id, .. }
            | UserEvent::UpdateIsVerified { user_id, .. }
            | UserEvent::UpdateCreatorNodeEndpoint { user_id, .. } => *user_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UserEvent::AddUser { .. } => "add_user",
            UserEvent::UpdateMultihash { .. } => "update_multihash",
            UserEvent::UpdateName { .. } => "update_name",
            UserEvent::UpdateLocation { .. } => "update_location",
            UserEvent::UpdateBio { .. } => "update_bio",
            UserEvent::UpdateProfilePhoto { .. } => "update_profile_photo",
            UserEvent::UpdateCoverPhoto { .. } => "update_cover_photo",
            UserEvent::UpdateIsCreator { .. } => "update_is_creator",
            UserEvent::UpdateIsVerified { .. } => "update_is_verified",
            UserEvent::UpdateCreatorNodeEndpoint { .. } => "update_creator_node_endpoint",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    NewTrack { track_id: i64, owner_id: i64, multihash: Multihash },
    UpdateTrack { track_id: i64, owner_id: i64, multihash: Multihash },
    TrackDeleted { track_id: i64 },
}

impl TrackEvent {
    pub fn track_id(&self) -> i64 {
        match self {
            TrackEvent::NewTrack { track_id, .. }
            | TrackEvent::UpdateTrack { track_id, .. }
            | TrackEvent::TrackDeleted { track_id } => *track_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocialEvent {
    TrackRepostAdded { user_id: i64, track_id: i64 },
    TrackRepostDeleted { user_id: i64, track_id: i64 },
    PlaylistRepostAdded { user_id: i64, playlist_id: i64 },
    PlaylistRepostDeleted { user_id: i64, playlist_id: i64 },
    UserFollowAdded { follower_user_id: i64, followee_user_id: i64 },
    UserFollowDeleted { follower_user_id: i64, followee_user_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserLibraryEvent {
    TrackSaveAdded { user_id: i64, track_id: i64 },
    TrackSaveDeleted { user_id: i64, track_id: i64 },
    PlaylistSaveAdded { user_id: i64, playlist_id: i64 },
    PlaylistSaveDeleted { user_id: i64, playlist_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEvent {
    Created {
        playlist_id: i64,
        owner_id: i64,
        is_private: bool,
        is_album: bool,
        track_ids: Vec<i64>,
    },
    Deleted { playlist_id: i64 },
    TrackAdded { playlist_id: i64, track_id: i64 },
    TrackDeleted { playlist_id: i64, track_id: i64, timestamp: i64 },
    TracksOrdered { playlist_id: i64, track_ids: Vec<i64> },
    NameUpdated { playlist_id: i64, name: String },
    PrivacyUpdated { playlist_id: i64, is_private: bool },
    CoverPhotoUpdated { playlist_id: i64, multihash: Multihash },
    DescriptionUpdated { playlist_id: i64, description: String },
    UpcUpdated { playlist_id: i64, upc: String },
}

impl PlaylistEvent {
    pub fn playlist_id(&self) -> i64 {
        match self {
            PlaylistEvent::Created { playlist_id, .. }
            | PlaylistEvent::Deleted { playlist_id }
            | PlaylistEvent::TrackAdded { playlist_id, .. }
            | PlaylistEvent::TrackDeleted { playlist_id, .. }
            | PlaylistEvent::TracksOrdered { playlist_id, .. }
            | PlaylistEvent::NameUpdated { playlist_id, .. }
            | PlaylistEvent::PrivacyUpdated { playlist_id, .. }
            | PlaylistEvent::CoverPhotoUpdated { playlist_id, .. }
            | PlaylistEvent::DescriptionUpdated { playlist_id, .. }
            | PlaylistEvent::UpcUpdated { playlist_id, .. } => *playlist_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaSetEvent {
    UpdateReplicaSet {
        user_id: i64,
        primary_id: i64,
        secondary_ids: Vec<i64>,
        signer: String,
    },
    AddOrUpdateContentNode {
        cnode_sp_id: i64,
        delegate_owner_wallet: String,
        proposer_sp_ids: Vec<i64>,
        proposer_wallets: [String; 3],
    },
}

/// A decoded log from one of the indexed contracts.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractEvent {
    User(UserEvent),
    Track(TrackEvent),
    Social(SocialEvent),
    Playlist(PlaylistEvent),
    UserLibrary(UserLibraryEvent),
    ReplicaSet(ReplicaSetEvent),
}
