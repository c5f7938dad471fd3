use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::{
    constants::{KEYPAIR_LEN, PUBLIC_KEY_LEN},
    error::IdentityError,
};

/// Parse a hex-encoded 64-byte Ed25519 keypair (seed followed by public key).
/// A keypair whose halves do not match is rejected.
pub fn parse_keypair_hex(s: &str) -> Result<SigningKey, IdentityError> {
    let bytes = hex::decode(s.trim())?;
    let arr: [u8; KEYPAIR_LEN] = bytes.try_into().map_err(|b: Vec<u8>| IdentityError::Length {
        expected: KEYPAIR_LEN,
        got: b.len(),
    })?;
    SigningKey::from_keypair_bytes(&arr).map_err(|_| IdentityError::Key)
}

/// Parse a hex-encoded 32-byte Ed25519 public key.
pub fn parse_public_hex(s: &str) -> Result<VerifyingKey, IdentityError> {
    let bytes = hex::decode(s.trim())?;
    let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| IdentityError::Length {
        expected: PUBLIC_KEY_LEN,
        got: b.len(),
    })?;
    VerifyingKey::from_bytes(&arr).map_err(|_| IdentityError::Key)
}

/// A peer's stable network address: its hex-encoded public key.
pub fn address(key: &VerifyingKey) -> String {
    hex::encode(key.to_bytes())
}
