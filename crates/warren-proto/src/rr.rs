use serde::{Deserialize, Serialize};

/// The shared shape of requests the c2 makes to agents and of the responses
/// agents send back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRr {
    /// The actual payload: the command on the way out, the result on the
    /// way back. Opaque to the transport.
    pub payload: Vec<u8>,

    /// A transaction ID mapping responses to requests. Opaque; any string
    /// of any length.
    pub tx_id: String,
}
