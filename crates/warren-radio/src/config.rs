use std::net::SocketAddr;

use ed25519_dalek::SigningKey;
use libp2p::Multiaddr;

/// Peering configuration for a [`crate::Radio`].
///
/// All peering inputs are optional but at least one must be set for the node
/// to be reachable; the daemons treat an empty peering set as a fatal
/// configuration error.
pub struct RadioConfig {
    /// Long-term Ed25519 identity. Drives both payload signing and the
    /// overlay peer ID, so the hex public key is the node's mesh address.
    pub identity: SigningKey,

    /// Address to listen on for inbound raw TCP peerings.
    pub listen_tcp: Option<SocketAddr>,

    /// Address to listen on for inbound WebSocket peerings.
    pub listen_ws: Option<SocketAddr>,

    /// Whether to discover mesh peers on the local network via multicast.
    pub use_multicast: bool,

    /// Static peers to connect to on startup.
    pub static_peers: Vec<Multiaddr>,
}

impl RadioConfig {
    pub fn new(identity: SigningKey) -> Self {
        Self {
            identity,
            listen_tcp: None,
            listen_ws: None,
            use_multicast: false,
            static_peers: Vec::new(),
        }
    }

    /// True when at least one way for peers to connect is configured.
    pub fn has_peering(&self) -> bool {
        self.listen_tcp.is_some()
            || self.listen_ws.is_some()
            || self.use_multicast
            || !self.static_peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn empty_config_has_no_peering() {
        let conf = RadioConfig::new(SigningKey::generate(&mut OsRng));
        assert!(!conf.has_peering());
    }

    #[test]
    fn any_input_counts_as_peering() {
        let mut conf = RadioConfig::new(SigningKey::generate(&mut OsRng));
        conf.use_multicast = true;
        assert!(conf.has_peering());

        let mut conf = RadioConfig::new(SigningKey::generate(&mut OsRng));
        conf.listen_tcp = Some("127.0.0.1:0".parse().unwrap());
        assert!(conf.has_peering());
    }
}
