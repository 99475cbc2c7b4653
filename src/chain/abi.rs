//! Contract event ABIs and decoding into the typed domain events.

use alloy::primitives::{Address, Bytes, FixedBytes, LogData, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use thiserror::Error;

use super::contracts::ContractKind;
use super::events::{
    ContractEvent, Multihash, PlaylistEvent, ReplicaSetEvent, SocialEvent, TrackEvent, UserEvent,
    UserLibraryEvent,
};

sol! {
    interface UserFactory {
        event AddUser(uint _userId, bytes32 _handle, address _wallet);
        event UpdateMultihash(uint _userId, bytes32 _multihashDigest);
        event UpdateName(uint _userId, bytes32 _name);
        event UpdateLocation(uint _userId, bytes32 _location);
        event UpdateBio(uint _userId, string _bio);
        event UpdateProfilePhoto(uint _userId, bytes32 _profilePhotoDigest);
        event UpdateCoverPhoto(uint _userId, bytes32 _coverPhotoDigest);
        event UpdateIsCreator(uint _userId, bool _isCreator);
        event UpdateIsVerified(uint _userId, bool _isVerified);
        event UpdateCreatorNodeEndpoint(uint _userId, string _creatorNodeEndpoint);
    }
}

sol! {
    interface TrackFactory {
        event NewTrack(uint _id, uint _trackOwnerId, bytes32 _multihashDigest, uint8 _multihashHashFn, uint8 _multihashSize);
        event UpdateTrack(uint _trackId, uint _trackOwnerId, bytes32 _multihashDigest, uint8 _multihashHashFn, uint8 _multihashSize);
        event TrackDeleted(uint _trackId);
    }
}

sol! {
    interface SocialFeatureFactory {
        event TrackRepostAdded(uint _userId, uint _trackId);
        event TrackRepostDeleted(uint _userId, uint _trackId);
        event PlaylistRepostAdded(uint _userId, uint _playlistId);
        event PlaylistRepostDeleted(uint _userId, uint _playlistId);
        event UserFollowAdded(uint _followerUserId, uint _followeeUserId);
        event UserFollowDeleted(uint _followerUserId, uint _followeeUserId);
    }
}

sol! {
    interface PlaylistFactory {
        event PlaylistCreated(uint _playlistId, uint _playlistOwnerId, bool _isPrivate, bool _isAlbum, uint[] _trackIds);
        event PlaylistDeleted(uint _playlistId);
        event PlaylistTrackAdded(uint _playlistId, uint _addedTrackId);
        event PlaylistTrackDeleted(uint _playlistId, uint _deletedTrackId, uint _deletedTrackTimestamp);
        event PlaylistTracksOrdered(uint _playlistId, uint[] _orderedTrackIds);
        event PlaylistNameUpdated(uint _playlistId, string _updatedPlaylistName);
        event PlaylistPrivacyUpdated(uint _playlistId, bool _updatedIsPrivate);
        event PlaylistCoverPhotoUpdated(uint _playlistId, bytes32 _playlistImageMultihashDigest);
        event PlaylistDescriptionUpdated(uint _playlistId, string _playlistDescription);
        event PlaylistUPCUpdated(uint _playlistId, bytes32 _playlistUPC);
    }
}

sol! {
    interface UserLibraryFactory {
        event TrackSaveAdded(uint _userId, uint _trackId);
        event TrackSaveDeleted(uint _userId, uint _trackId);
        event PlaylistSaveAdded(uint _userId, uint _playlistId);
        event PlaylistSaveDeleted(uint _userId, uint _playlistId);
    }
}

sol! {
    interface UserReplicaSetManager {
        event UpdateReplicaSet(uint _userId, uint _primaryId, uint[] _secondaryIds, uint _oldPrimaryId, uint[] _oldSecondaryIds, address _signer);
        event AddOrUpdateContentNode(uint _cnodeSpId, address _cnodeDelegateOwnerWallet, uint[3] _proposerSpIds, address _proposer1Address, address _proposer2Address, address _proposer3Address);
    }
}

sol! {
    interface Registry {
        function getContract(bytes32 _name) external view returns (address);
    }
}

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("Failed to decode {event}: {message}")]
    Decode { event: &'static str, message: String },

    #[error("Value {0} in {1} does not fit a 64-bit id")]
    IdOverflow(U256, &'static str),
}

fn decode<E: SolEvent>(data: &LogData) -> Result<E, AbiError> {
    E::decode_log_data(data).map_err(|e| AbiError::Decode {
        event: E::SIGNATURE,
        message: e.to_string(),
    })
}

fn id(value: U256, field: &'static str) -> Result<i64, AbiError> {
    i64::try_from(value).map_err(|_| AbiError::IdOverflow(value, field))
}

fn ids(values: &[U256], field: &'static str) -> Result<Vec<i64>, AbiError> {
    values.iter().map(|v| id(*v, field)).collect()
}

fn address(value: Address) -> String {
    value.to_string().to_lowercase()
}

/// Decode a right-padded `bytes32` string, dropping trailing NULs.
pub fn bytes32_to_string(value: &FixedBytes<32>) -> String {
    let end = value
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |idx| idx + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

/// Calldata for `Registry.getContract(name)`.
pub fn registry_lookup_call(name: &str) -> Bytes {
    Registry::getContractCall {
        _name: FixedBytes::right_padding_from(name.as_bytes()),
    }
    .abi_encode()
    .into()
}

/// The address returned by `Registry.getContract`, `None` when unset.
pub fn decode_registry_lookup(output: &[u8]) -> Result<Option<String>, AbiError> {
    let value = Registry::getContractCall::abi_decode_returns(output).map_err(|e| {
        AbiError::Decode {
            event: "getContract",
            message: e.to_string(),
        }
    })?;
    Ok((!value.is_zero()).then(|| address(value)))
}

/// Decode a log emitted by the contract of the given kind. Logs whose topic
/// matches none of the contract's events yield `Ok(None)`.
pub fn decode_log(kind: ContractKind, data: &LogData) -> Result<Option<ContractEvent>, AbiError> {
    let Some(topic0) = data.topics().first().copied() else {
        return Ok(None);
    };
    match kind {
        ContractKind::User => decode_user(topic0, data).map(|e| e.map(ContractEvent::User)),
        ContractKind::Track => decode_track(topic0, data).map(|e| e.map(ContractEvent::Track)),
        ContractKind::Social => decode_social(topic0, data).map(|e| e.map(ContractEvent::Social)),
        ContractKind::Playlist => {
            decode_playlist(topic0, data).map(|e| e.map(ContractEvent::Playlist))
        }
        ContractKind::UserLibrary => {
            decode_user_library(topic0, data).map(|e| e.map(ContractEvent::UserLibrary))
        }
        ContractKind::ReplicaSet => {
            decode_replica_set(topic0, data).map(|e| e.map(ContractEvent::ReplicaSet))
        }
    }
}

fn decode_user(topic0: FixedBytes<32>, data: &LogData) -> Result<Option<UserEvent>, AbiError> {
    use UserFactory as F;

    let event = match topic0 {
        t if t == F::AddUser::SIGNATURE_HASH => {
            let e: F::AddUser = decode(data)?;
            UserEvent::AddUser {
                user_id: id(e._userId, "_userId")?,
                handle: bytes32_to_string(&e._handle),
                wallet: address(e._wallet),
            }
        }
        t if t == F::UpdateMultihash::SIGNATURE_HASH => {
            let e: F::UpdateMultihash = decode(data)?;
            UserEvent::UpdateMultihash {
                user_id: id(e._userId, "_userId")?,
                multihash: Multihash::sha256(e._multihashDigest.0),
            }
        }
        t if t == F::UpdateName::SIGNATURE_HASH => {
            let e: F::UpdateName = decode(data)?;
            UserEvent::UpdateName {
                user_id: id(e._userId, "_userId")?,
                name: bytes32_to_string(&e._name),
            }
        }
        t if t == F::UpdateLocation::SIGNATURE_HASH => {
            let e: F::UpdateLocation = decode(data)?;
            UserEvent::UpdateLocation {
                user_id: id(e._userId, "_userId")?,
                location: bytes32_to_string(&e._location),
            }
        }
        t if t == F::UpdateBio::SIGNATURE_HASH => {
            let e: F::UpdateBio = decode(data)?;
            UserEvent::UpdateBio {
                user_id: id(e._userId, "_userId")?,
                bio: e._bio,
            }
        }
        t if t == F::UpdateProfilePhoto::SIGNATURE_HASH => {
            let e: F::UpdateProfilePhoto = decode(data)?;
            UserEvent::UpdateProfilePhoto {
                user_id: id(e._userId, "_userId")?,
                multihash: Multihash::sha256(e._profilePhotoDigest.0),
            }
        }
        t if t == F::UpdateCoverPhoto::SIGNATURE_HASH => {
            let e: F::UpdateCoverPhoto = decode(data)?;
            UserEvent::UpdateCoverPhoto {
                user_id: id(e._userId, "_userId")?,
                multihash: Multihash::sha256(e._coverPhotoDigest.0),
            }
        }
        t if t == F::UpdateIsCreator::SIGNATURE_HASH => {
            let e: F::UpdateIsCreator = decode(data)?;
            UserEvent::UpdateIsCreator {
                user_id: id(e._userId, "_userId")?,
                is_creator: e._isCreator,
            }
        }
        t if t == F::UpdateIsVerified::SIGNATURE_HASH => {
            let e: F::UpdateIsVerified = decode(data)?;
            UserEvent::UpdateIsVerified {
                user_id: id(e._userId, "_userId")?,
                is_verified: e._isVerified,
            }
        }
        t if t == F::UpdateCreatorNodeEndpoint::SIGNATURE_HASH => {
            let e: F::UpdateCreatorNodeEndpoint = decode(data)?;
            UserEvent::UpdateCreatorNodeEndpoint {
                user_id: id(e._userId, "_userId")?,
                endpoint: e._creatorNodeEndpoint,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_track(topic0: FixedBytes<32>, data: &LogData) -> Result<Option<TrackEvent>, AbiError> {
    use TrackFactory as F;

    let event = match topic0 {
        t if t == F::NewTrack::SIGNATURE_HASH => {
            let e: F::NewTrack = decode(data)?;
            TrackEvent::NewTrack {
                track_id: id(e._id, "_id")?,
                owner_id: id(e._trackOwnerId, "_trackOwnerId")?,
                multihash: Multihash {
                    digest: e._multihashDigest.0,
                    hash_fn: e._multihashHashFn,
                    size: e._multihashSize,
                },
            }
        }
        t if t == F::UpdateTrack::SIGNATURE_HASH => {
            let e: F::UpdateTrack = decode(data)?;
            TrackEvent::UpdateTrack {
                track_id: id(e._trackId, "_trackId")?,
                owner_id: id(e._trackOwnerId, "_trackOwnerId")?,
                multihash: Multihash {
                    digest: e._multihashDigest.0,
                    hash_fn: e._multihashHashFn,
                    size: e._multihashSize,
                },
            }
        }
        t if t == F::TrackDeleted::SIGNATURE_HASH => {
            let e: F::TrackDeleted = decode(data)?;
            TrackEvent::TrackDeleted {
                track_id: id(e._trackId, "_trackId")?,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_social(topic0: FixedBytes<32>, data: &LogData) -> Result<Option<SocialEvent>, AbiError> {
    use SocialFeatureFactory as F;

    let event = match topic0 {
        t if t == F::TrackRepostAdded::SIGNATURE_HASH => {
            let e: F::TrackRepostAdded = decode(data)?;
            SocialEvent::TrackRepostAdded {
                user_id: id(e._userId, "_userId")?,
                track_id: id(e._trackId, "_trackId")?,
            }
        }
        t if t == F::TrackRepostDeleted::SIGNATURE_HASH => {
            let e: F::TrackRepostDeleted = decode(data)?;
            SocialEvent::TrackRepostDeleted {
                user_id: id(e._userId, "_userId")?,
                track_id: id(e._trackId, "_trackId")?,
            }
        }
        t if t == F::PlaylistRepostAdded::SIGNATURE_HASH => {
            let e: F::PlaylistRepostAdded = decode(data)?;
            SocialEvent::PlaylistRepostAdded {
                user_id: id(e._userId, "_userId")?,
                playlist_id: id(e._playlistId, "_playlistId")?,
            }
        }
        t if t == F::PlaylistRepostDeleted::SIGNATURE_HASH => {
            let e: F::PlaylistRepostDeleted = decode(data)?;
            SocialEvent::PlaylistRepostDeleted {
                user_id: id(e._userId, "_userId")?,
                playlist_id: id(e._playlistId, "_playlistId")?,
            }
        }
        t if t == F::UserFollowAdded::SIGNATURE_HASH => {
            let e: F::UserFollowAdded = decode(data)?;
            SocialEvent::UserFollowAdded {
                follower_user_id: id(e._followerUserId, "_followerUserId")?,
                followee_user_id: id(e._followeeUserId, "_followeeUserId")?,
            }
        }
        t if t == F::UserFollowDeleted::SIGNATURE_HASH => {
            let e: F::UserFollowDeleted = decode(data)?;
            SocialEvent::UserFollowDeleted {
                follower_user_id: id(e._followerUserId, "_followerUserId")?,
                followee_user_id: id(e._followeeUserId, "_followeeUserId")?,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_playlist(
    topic0: FixedBytes<32>,
    data: &LogData,
) -> Result<Option<PlaylistEvent>, AbiError> {
    use PlaylistFactory as F;

    let event = match topic0 {
        t if t == F::PlaylistCreated::SIGNATURE_HASH => {
            let e: F::PlaylistCreated = decode(data)?;
            PlaylistEvent::Created {
                playlist_id: id(e._playlistId, "_playlistId")?,
                owner_id: id(e._playlistOwnerId, "_playlistOwnerId")?,
                is_private: e._isPrivate,
                is_album: e._isAlbum,
                track_ids: ids(&e._trackIds, "_trackIds")?,
            }
        }
        t if t == F::PlaylistDeleted::SIGNATURE_HASH => {
            let e: F::PlaylistDeleted = decode(data)?;
            PlaylistEvent::Deleted {
                playlist_id: id(e._playlistId, "_playlistId")?,
            }
        }
        t if t == F::PlaylistTrackAdded::SIGNATURE_HASH => {
            let e: F::PlaylistTrackAdded = decode(data)?;
            PlaylistEvent::TrackAdded {
                playlist_id: id(e._playlistId, "_playlistId")?,
                track_id: id(e._addedTrackId, "_addedTrackId")?,
            }
        }
        t if t == F::PlaylistTrackDeleted::SIGNATURE_HASH => {
            let e: F::PlaylistTrackDeleted = decode(data)?;
            PlaylistEvent::TrackDeleted {
                playlist_id: id(e._playlistId, "_playlistId")?,
                track_id: id(e._deletedTrackId, "_deletedTrackId")?,
                timestamp: id(e._deletedTrackTimestamp, "_deletedTrackTimestamp")?,
            }
        }
        t if t == F::PlaylistTracksOrdered::SIGNATURE_HASH => {
            let e: F::PlaylistTracksOrdered = decode(data)?;
            PlaylistEvent::TracksOrdered {
                playlist_id: id(e._playlistId, "_playlistId")?,
                track_ids: ids(&e._orderedTrackIds, "_orderedTrackIds")?,
            }
        }
        t if t == F::PlaylistNameUpdated::SIGNATURE_HASH => {
            let e: F::PlaylistNameUpdated = decode(data)?;
            PlaylistEvent::NameUpdated {
                playlist_id: id(e._playlistId, "_playlistId")?,
                name: e._updatedPlaylistName,
            }
        }
        t if t == F::PlaylistPrivacyUpdated::SIGNATURE_HASH => {
            let e: F::PlaylistPrivacyUpdated = decode(data)?;
            PlaylistEvent::PrivacyUpdated {
                playlist_id: id(e._playlistId, "_playlistId")?,
                is_private: e._updatedIsPrivate,
            }
        }
        t if t == F::PlaylistCoverPhotoUpdated::SIGNATURE_HASH => {
            let e: F::PlaylistCoverPhotoUpdated = decode(data)?;
            PlaylistEvent::CoverPhotoUpdated {
                playlist_id: id(e._playlistId, "_playlistId")?,
                multihash: Multihash::sha256(e._playlistImageMultihashDigest.0),
            }
        }
        t if t == F::PlaylistDescriptionUpdated::SIGNATURE_HASH => {
            let e: F::PlaylistDescriptionUpdated = decode(data)?;
            PlaylistEvent::DescriptionUpdated {
                playlist_id: id(e._playlistId, "_playlistId")?,
                description: e._playlistDescription,
            }
        }
        t if t == F::PlaylistUPCUpdated::SIGNATURE_HASH => {
            let e: F::PlaylistUPCUpdated = decode(data)?;
            PlaylistEvent::UpcUpdated {
                playlist_id: id(e._playlistId, "_playlistId")?,
                upc: bytes32_to_string(&e._playlistUPC),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_user_library(
    topic0: FixedBytes<32>,
    data: &LogData,
) -> Result<Option<UserLibraryEvent>, AbiError> {
    use UserLibraryFactory as F;

    let event = match topic0 {
        t if t == F::TrackSaveAdded::SIGNATURE_HASH => {
            let e: F::TrackSaveAdded = decode(data)?;
            UserLibraryEvent::TrackSaveAdded {
                user_id: id(e._userId, "_userId")?,
                track_id: id(e._trackId, "_trackId")?,
            }
        }
        t if t == F::TrackSaveDeleted::SIGNATURE_HASH => {
            let e: F::TrackSaveDeleted = decode(data)?;
            UserLibraryEvent::TrackSaveDeleted {
                user_id: id(e._userId, "_userId")?,
                track_id: id(e._trackId, "_trackId")?,
            }
        }
        t if t == F::PlaylistSaveAdded::SIGNATURE_HASH => {
            let e: F::PlaylistSaveAdded = decode(data)?;
            UserLibraryEvent::PlaylistSaveAdded {
                user_id: id(e._userId, "_userId")?,
                playlist_id: id(e._playlistId, "_playlistId")?,
            }
        }
        t if t == F::PlaylistSaveDeleted::SIGNATURE_HASH => {
            let e: F::PlaylistSaveDeleted = decode(data)?;
            UserLibraryEvent::PlaylistSaveDeleted {
                user_id: id(e._userId, "_userId")?,
                playlist_id: id(e._playlistId, "_playlistId")?,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_replica_set(
    topic0: FixedBytes<32>,
    data: &LogData,
) -> Result<Option<ReplicaSetEvent>, AbiError> {
    use UserReplicaSetManager as F;

    let event = match topic0 {
        t if t == F::UpdateReplicaSet::SIGNATURE_HASH => {
            let e: F::UpdateReplicaSet = decode(data)?;
            ReplicaSetEvent::UpdateReplicaSet {
                user_id: id(e._userId, "_userId")?,
                primary_id: id(e._primaryId, "_primaryId")?,
                secondary_ids: ids(&e._secondaryIds, "_secondaryIds")?,
                signer: address(e._signer),
            }
        }
        t if t == F::AddOrUpdateContentNode::SIGNATURE_HASH => {
            let e: F::AddOrUpdateContentNode = decode(data)?;
            ReplicaSetEvent::AddOrUpdateContentNode {
                cnode_sp_id: id(e._cnodeSpId, "_cnodeSpId")?,
                delegate_owner_wallet: address(e._cnodeDelegateOwnerWallet),
                proposer_sp_ids: ids(&e._proposerSpIds, "_proposerSpIds")?,
                proposer_wallets: [
                    address(e._proposer1Address),
                    address(e._proposer2Address),
                    address(e._proposer3Address),
                ],
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}
