use std::net::SocketAddr;

use clap::Parser;
use ed25519_dalek::SigningKey;
use libp2p::Multiaddr;

use warren_proto::parse_keypair_hex;
use warren_radio::RadioConfig;

#[derive(Parser, Debug)]
#[command(name = "warren-c2", about = "warren mesh controller")]
pub struct Config {
    /// Hex-encoded 64-byte Ed25519 keypair to use as identity on the mesh.
    /// Generate one with warren-keygen.
    #[arg(long, env = "WARREN_C2_ID")]
    pub identity: String,

    /// Address to listen on for inbound TCP peerings, e.g. 0.0.0.0:27417.
    #[arg(long, env = "WARREN_C2_INBOUND_TCP")]
    pub inbound_tcp: Option<SocketAddr>,

    /// Address to listen on for inbound WebSocket peerings.
    #[arg(long, env = "WARREN_C2_INBOUND_WS")]
    pub inbound_ws: Option<SocketAddr>,

    /// Discover mesh peers on the local network via multicast.
    #[arg(long, env = "WARREN_C2_USE_MULTICAST", default_value = "false")]
    pub use_multicast: bool,

    /// Comma-delimited list of static peer multiaddrs to connect to.
    #[arg(long, env = "WARREN_C2_STATIC_PEERS", value_delimiter = ',')]
    pub static_peers: Vec<Multiaddr>,

    /// HTTP path of the mesh debug endpoint on the admin API (omit to
    /// disable).
    #[arg(long, env = "WARREN_C2_DEBUG_ENDPOINT")]
    pub debug_endpoint: Option<String>,

    /// Access token granting read-only admin API access.
    #[arg(long, env = "WARREN_C2_VIEW_TOKEN")]
    pub view_token: String,

    /// Access token granting full admin API access.
    #[arg(long, env = "WARREN_C2_ADMIN_TOKEN")]
    pub admin_token: String,

    /// Admin API listen address.
    #[arg(long, env = "WARREN_C2_API_ADDR", default_value = "127.0.0.1:48080")]
    pub api_addr: SocketAddr,
}

impl Config {
    /// Validate the configuration and parse the identity. Any failure here
    /// is fatal misconfiguration.
    pub fn validate(&self) -> Result<SigningKey, String> {
        let identity = parse_keypair_hex(&self.identity)
            .map_err(|e| format!("provided identity is unusable: {e}"))?;

        if self.inbound_tcp.is_none()
            && self.inbound_ws.is_none()
            && !self.use_multicast
            && self.static_peers.is_empty()
        {
            return Err("no way for peers to connect was specified".to_string());
        }

        if let Some(path) = &self.debug_endpoint {
            if !path.starts_with('/') {
                return Err(format!("debug endpoint `{path}` must start with `/`"));
            }
        }

        Ok(identity)
    }

    pub fn radio_config(&self, identity: SigningKey) -> RadioConfig {
        let mut conf = RadioConfig::new(identity);
        conf.listen_tcp = self.inbound_tcp;
        conf.listen_ws = self.inbound_ws;
        conf.use_multicast = self.use_multicast;
        conf.static_peers = self.static_peers.clone();
        conf
    }
}
