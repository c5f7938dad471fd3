//! Mapping between warren addresses (hex Ed25519 public keys) and overlay
//! peer IDs.
//!
//! Ed25519 peer IDs are identity multihashes of the protobuf-encoded public
//! key, so the mapping is invertible: the receive path recovers the sender's
//! signing key from the connection itself, and the send path derives the
//! overlay destination from a bare hex address.

use ed25519_dalek::SigningKey;
use libp2p::{identity, PeerId};
use thiserror::Error;

use warren_proto::PUBLIC_KEY_LEN;

/// Multihash code of the identity hash function.
const MULTIHASH_IDENTITY: u8 = 0x00;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("peer address is not a hex-encoded string")]
    Hex(#[from] hex::FromHexError),

    #[error("peer address has incorrect length (is {0}, should be {PUBLIC_KEY_LEN})")]
    Length(usize),

    #[error("peer address is not a valid Ed25519 public key")]
    Key,
}

/// Derive the overlay peer ID for a hex-encoded public key address.
pub fn peer_id_for_address(address: &str) -> Result<PeerId, AddressError> {
    let bytes = hex::decode(address)?;
    let arr: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| AddressError::Length(b.len()))?;
    let public = identity::ed25519::PublicKey::try_from_bytes(&arr)
        .map_err(|_| AddressError::Key)?;
    Ok(identity::PublicKey::from(public).to_peer_id())
}

/// Recover the hex-encoded public key address from an overlay peer ID.
///
/// Returns `None` for peer IDs that do not embed an Ed25519 key (hashed
/// multihashes, other key types).
pub fn address_for_peer(peer: &PeerId) -> Option<String> {
    // Identity multihash layout: 0x00, varint digest length, digest.
    // Ed25519 digests are 36 bytes, so the length always fits one byte.
    let bytes = peer.to_bytes();
    if bytes.len() < 2 || bytes[0] != MULTIHASH_IDENTITY {
        return None;
    }
    let digest = bytes.get(2..)?;
    if digest.len() != bytes[1] as usize {
        return None;
    }

    let public = identity::PublicKey::try_decode_protobuf(digest).ok()?;
    let ed = public.try_into_ed25519().ok()?;
    Some(hex::encode(ed.to_bytes()))
}

/// Derive the overlay keypair from a warren signing key. The same Ed25519
/// secret drives both packet signing and the overlay peer identity.
pub fn to_overlay_keypair(signing_key: &SigningKey) -> identity::Keypair {
    let mut bytes = signing_key.to_bytes();
    let secret = identity::ed25519::SecretKey::try_from_bytes(&mut bytes)
        .expect("valid 32-byte ed25519 secret");
    identity::Keypair::from(identity::ed25519::Keypair::from(secret))
}
