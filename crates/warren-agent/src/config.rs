use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use ed25519_dalek::SigningKey;
use libp2p::Multiaddr;
use rand::rngs::OsRng;

use warren_proto::{
    parse_keypair_hex, HEARTBEAT_INTERVAL_MAX, HEARTBEAT_INTERVAL_MIN, PUBLIC_KEY_LEN,
};

/// Runtime configuration for an [`crate::Agent`].
#[derive(Debug)]
pub struct AgentConfig {
    /// This agent's Ed25519 identity.
    pub identity: SigningKey,

    /// The controller's public key. This value solely decides who has
    /// control over the agent; it is scrubbed once the agent has copied it.
    pub admin_key: [u8; PUBLIC_KEY_LEN],

    /// Address to listen on for inbound TCP peerings. Listening makes the
    /// agent more visible but can improve its chances of reaching the c2.
    pub listen_tcp: Option<SocketAddr>,

    /// Address to listen on for inbound WebSocket peerings.
    pub listen_ws: Option<SocketAddr>,

    /// Whether to discover mesh peers on the local network via multicast.
    pub use_multicast: bool,

    /// Static peers to connect to on startup.
    pub static_peers: Vec<Multiaddr>,

    /// Strain fingerprint reported in heartbeats.
    pub strain_id: String,

    /// Module names reported in heartbeats.
    pub modules: Vec<String>,

    /// Bounds for the jittered heartbeat interval.
    pub heartbeat_min: Duration,
    pub heartbeat_max: Duration,
}

impl AgentConfig {
    pub fn new(identity: SigningKey, admin_key: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self {
            identity,
            admin_key,
            listen_tcp: None,
            listen_ws: None,
            use_multicast: false,
            static_peers: Vec::new(),
            strain_id: String::new(),
            modules: vec!["exchange".to_string()],
            heartbeat_min: HEARTBEAT_INTERVAL_MIN,
            heartbeat_max: HEARTBEAT_INTERVAL_MAX,
        }
    }
}

// ============================================================================
// Daemon command line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "warren-agent", about = "warren mesh agent")]
pub struct Cli {
    /// Hex-encoded 64-byte Ed25519 keypair to use as identity on the mesh.
    /// A fresh identity is generated when omitted.
    #[arg(long, env = "WARREN_AGENT_ID")]
    pub identity: Option<String>,

    /// Hex-encoded 32-byte public key of the controller.
    #[arg(long, env = "WARREN_AGENT_ADMIN_KEY")]
    pub admin_key: String,

    /// Address to listen on for inbound TCP peerings.
    #[arg(long, env = "WARREN_AGENT_INBOUND_TCP")]
    pub inbound_tcp: Option<SocketAddr>,

    /// Address to listen on for inbound WebSocket peerings.
    #[arg(long, env = "WARREN_AGENT_INBOUND_WS")]
    pub inbound_ws: Option<SocketAddr>,

    /// Discover mesh peers on the local network via multicast.
    #[arg(long, env = "WARREN_AGENT_USE_MULTICAST", default_value = "false")]
    pub use_multicast: bool,

    /// Comma-delimited list of static peer multiaddrs to connect to.
    #[arg(long, env = "WARREN_AGENT_STATIC_PEERS", value_delimiter = ',')]
    pub static_peers: Vec<Multiaddr>,

    /// Strain fingerprint reported in heartbeats.
    #[arg(long, env = "WARREN_AGENT_STRAIN_ID", default_value = "dev")]
    pub strain_id: String,
}

impl Cli {
    /// Validate the command line and build the agent configuration. Any
    /// failure here is fatal misconfiguration.
    pub fn agent_config(&self) -> Result<AgentConfig, String> {
        let identity = match &self.identity {
            Some(hex_key) => parse_keypair_hex(hex_key)
                .map_err(|e| format!("provided identity is unusable: {e}"))?,
            None => SigningKey::generate(&mut OsRng),
        };

        let admin_bytes = hex::decode(self.admin_key.trim())
            .map_err(|_| "provided admin key is not a hex-encoded string".to_string())?;
        let admin_key: [u8; PUBLIC_KEY_LEN] = admin_bytes.try_into().map_err(|b: Vec<u8>| {
            format!(
                "incorrect admin key size (is {}, should be {PUBLIC_KEY_LEN})",
                b.len(),
            )
        })?;

        let mut conf = AgentConfig::new(identity, admin_key);
        conf.listen_tcp = self.inbound_tcp;
        conf.listen_ws = self.inbound_ws;
        conf.use_multicast = self.use_multicast;
        conf.static_peers = self.static_peers.clone();
        conf.strain_id = self.strain_id.clone();
        Ok(conf)
    }
}
