use serde::{Deserialize, Serialize};

pub const METHOD_POST: &str = "POST";

/// The outer envelope carried between mesh peers.
///
/// `peer` is the hex-encoded public key of the other party: the source on
/// receive, the destination on send. `data` is an opaque signed payload as
/// produced by [`crate::codec::marshal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Hex-encoded 32-byte public key of the remote peer.
    pub peer: String,

    /// The HTTP method this packet was received or is to be sent with.
    pub method: String,

    /// The route this packet was received on or is being sent to,
    /// without the version prefix.
    pub route: String,

    /// The signed payload bytes.
    pub data: Vec<u8>,
}

impl Packet {
    pub fn post(peer: impl Into<String>, route: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            peer: peer.into(),
            method: METHOD_POST.to_string(),
            route: route.into(),
            data,
        }
    }
}
