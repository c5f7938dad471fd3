use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    identify, kad, mdns, request_response,
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use warren_proto::{Packet, ROUTE_PREFIX};

use crate::{
    address::{address_for_peer, peer_id_for_address},
    behaviour::{build_swarm, WarrenBehaviour, WarrenBehaviourEvent},
    config::RadioConfig,
    wire::{RequestFrame, ResponseFrame, STATUS_BAD_REQUEST, STATUS_NOT_FOUND, STATUS_NO_CONTENT},
};

/// Grace period for draining in-flight overlay activity after an exit request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The drain ends early once the swarm has been quiet for this long.
const DRAIN_IDLE: Duration = Duration::from_millis(100);

/// Depth of the transmit and receive packet queues.
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio is not running")]
    Stopped,

    #[error("radio startup failed: {0}")]
    Startup(String),
}

/// Observable mesh state, served by the controller's debug endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RadioStatus {
    pub running: bool,
    /// This node's hex-encoded public key.
    pub local_address: String,
    /// This node's overlay peer ID.
    pub peer_id: String,
    pub listen_addrs: Vec<String>,
    pub connected_peers: Vec<String>,
}

// ============================================================================
// Radio
// ============================================================================

/// A warren mesh node.
///
/// One explicitly constructed instance per process, shared via `Arc`. The
/// running instance owns the overlay swarm in a dedicated task; the public
/// surface is the packet queues plus the lifecycle operations.
pub struct Radio {
    shared: Arc<Shared>,
}

struct Shared {
    conf: RadioConfig,
    txq_tx: mpsc::Sender<Packet>,
    txq_rx: AsyncMutex<mpsc::Receiver<Packet>>,
    rxq_tx: mpsc::Sender<Packet>,
    rxq_rx: AsyncMutex<mpsc::Receiver<Packet>>,
    run: std::sync::Mutex<RunState>,
    status: std::sync::Mutex<RadioStatus>,
}

#[derive(Default)]
struct RunState {
    running: bool,
    exit_tx: Option<watch::Sender<bool>>,
    done_rx: Option<watch::Receiver<bool>>,
}

impl Radio {
    pub fn new(conf: RadioConfig) -> Arc<Self> {
        let (txq_tx, txq_rx) = mpsc::channel(QUEUE_DEPTH);
        let (rxq_tx, rxq_rx) = mpsc::channel(QUEUE_DEPTH);

        let local_address = hex::encode(conf.identity.verifying_key().to_bytes());
        let peer_id = crate::address::to_overlay_keypair(&conf.identity)
            .public()
            .to_peer_id();

        Arc::new(Self {
            shared: Arc::new(Shared {
                conf,
                txq_tx,
                txq_rx: AsyncMutex::new(txq_rx),
                rxq_tx,
                rxq_rx: AsyncMutex::new(rxq_rx),
                run: std::sync::Mutex::new(RunState::default()),
                status: std::sync::Mutex::new(RadioStatus {
                    local_address,
                    peer_id: peer_id.to_string(),
                    ..RadioStatus::default()
                }),
            }),
        })
    }

    /// This node's mesh address (hex-encoded public key).
    pub fn local_address(&self) -> String {
        self.shared.status.lock().unwrap().local_address.clone()
    }

    /// This node's overlay peer ID.
    pub fn local_peer_id(&self) -> PeerId {
        crate::address::to_overlay_keypair(&self.shared.conf.identity)
            .public()
            .to_peer_id()
    }

    pub fn status(&self) -> RadioStatus {
        self.shared.status.lock().unwrap().clone()
    }

    /// Multiaddrs other nodes can use as static peers to reach this one.
    /// Empty until the listeners have come up.
    pub fn dial_addrs(&self) -> Vec<Multiaddr> {
        let peer_id = self.local_peer_id();
        self.status()
            .listen_addrs
            .iter()
            .filter_map(|a| a.parse::<Multiaddr>().ok())
            .map(|mut a| {
                a.push(libp2p::multiaddr::Protocol::P2p(peer_id));
                a
            })
            .collect()
    }

    /// Check whether the radio is currently running.
    pub fn is_running(&self) -> bool {
        self.shared.run.lock().unwrap().running
    }

    /// Start the radio as configured. Single-flight: while a run is active,
    /// further calls return immediately without spawning a duplicate.
    pub async fn start(&self) -> Result<(), RadioError> {
        let (exit_rx, done_tx) = {
            let mut run = self.shared.run.lock().unwrap();
            if run.running {
                return Ok(());
            }
            let (exit_tx, exit_rx) = watch::channel(false);
            let (done_tx, done_rx) = watch::channel(false);
            run.running = true;
            run.exit_tx = Some(exit_tx);
            run.done_rx = Some(done_rx);
            (exit_rx, done_tx)
        };

        let swarm = match build_swarm(&self.shared.conf).await {
            Ok(s) => s,
            Err(e) => {
                let mut run = self.shared.run.lock().unwrap();
                run.running = false;
                run.exit_tx = None;
                run.done_rx = None;
                return Err(RadioError::Startup(e));
            }
        };

        {
            let mut status = self.shared.status.lock().unwrap();
            status.running = true;
            status.listen_addrs.clear();
            status.connected_peers.clear();
        }

        tracing::info!(
            address = %self.local_address(),
            peer_id = %self.local_peer_id(),
            "Radio starting",
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_loop(&shared, swarm, exit_rx).await;

            {
                let mut run = shared.run.lock().unwrap();
                run.running = false;
                run.exit_tx = None;
                run.done_rx = None;
            }
            {
                let mut status = shared.status.lock().unwrap();
                status.running = false;
                status.listen_addrs.clear();
                status.connected_peers.clear();
            }

            tracing::info!("Radio stopped");
            let _ = done_tx.send(true);
        });

        Ok(())
    }

    /// Stop the radio. Blocks until the running instance has fully drained
    /// and torn down. Calling this when not running is a no-op.
    pub async fn stop(&self) {
        let (exit_tx, mut done_rx) = {
            let run = self.shared.run.lock().unwrap();
            if !run.running {
                return;
            }
            match (&run.exit_tx, &run.done_rx) {
                (Some(exit), Some(done)) => (exit.clone(), done.clone()),
                _ => return,
            }
        };

        let _ = exit_tx.send(true);

        while !*done_rx.borrow() {
            if done_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Restart the radio. Equivalent to calling `stop` then `start`.
    pub async fn restart(&self) -> Result<(), RadioError> {
        self.stop().await;
        self.start().await
    }

    /// Enqueue a packet for transmission to the peer it names.
    ///
    /// Transport is best-effort past this point; an error is returned only
    /// when the radio has stopped.
    pub async fn send(&self, packet: Packet) -> Result<(), RadioError> {
        let mut exit_rx = self.subscribe_exit()?;
        tokio::select! {
            res = self.shared.txq_tx.send(packet) => res.map_err(|_| RadioError::Stopped),
            _ = wait_signal(&mut exit_rx) => Err(RadioError::Stopped),
        }
    }

    /// Receive the next inbound packet. Blocks until a packet arrives or the
    /// radio stops; the latter surfaces as an error and marks the graceful
    /// end of the stream.
    pub async fn recv(&self) -> Result<Packet, RadioError> {
        let mut exit_rx = self.subscribe_exit()?;
        let mut rxq = self.shared.rxq_rx.lock().await;
        tokio::select! {
            biased;
            packet = rxq.recv() => packet.ok_or(RadioError::Stopped),
            _ = wait_signal(&mut exit_rx) => Err(RadioError::Stopped),
        }
    }

    fn subscribe_exit(&self) -> Result<watch::Receiver<bool>, RadioError> {
        let run = self.shared.run.lock().unwrap();
        if !run.running {
            return Err(RadioError::Stopped);
        }
        run.exit_tx
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(RadioError::Stopped)
    }
}

async fn wait_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Run loop
// ============================================================================

async fn run_loop(
    shared: &Arc<Shared>,
    mut swarm: Swarm<WarrenBehaviour>,
    mut exit_rx: watch::Receiver<bool>,
) {
    let mut txq = shared.txq_rx.lock().await;

    loop {
        tokio::select! {
            _ = wait_signal(&mut exit_rx) => break,
            Some(packet) = txq.recv() => transmit(&mut swarm, packet),
            event = swarm.select_next_some() => handle_event(shared, &mut swarm, event),
        }
    }

    // Bounded drain so in-flight acknowledgements get flushed before the
    // swarm (and with it every listener and session) is torn down.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        loop {
            match tokio::time::timeout(DRAIN_IDLE, swarm.select_next_some()).await {
                Ok(event) => handle_event(shared, &mut swarm, event),
                Err(_) => break,
            }
        }
    })
    .await;
}

fn transmit(swarm: &mut Swarm<WarrenBehaviour>, packet: Packet) {
    let peer = match peer_id_for_address(&packet.peer) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Dropping outbound packet with bad peer address: {e}");
            return;
        }
    };

    let frame = RequestFrame {
        method: packet.method,
        path: format!("{ROUTE_PREFIX}{}", packet.route),
        body: packet.data,
    };

    swarm.behaviour_mut().request_response.send_request(&peer, frame);
}

fn handle_event(
    shared: &Arc<Shared>,
    swarm: &mut Swarm<WarrenBehaviour>,
    event: SwarmEvent<WarrenBehaviourEvent>,
) {
    match event {
        SwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!("Listening on {address}");
            shared.status.lock().unwrap().listen_addrs.push(address.to_string());
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            tracing::debug!("Connected to {peer_id}");
            let label = address_for_peer(&peer_id).unwrap_or_else(|| peer_id.to_string());
            let mut status = shared.status.lock().unwrap();
            if !status.connected_peers.contains(&label) {
                status.connected_peers.push(label);
            }
        }
        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
            tracing::debug!("Disconnected from {peer_id}");
            if num_established == 0 {
                let label = address_for_peer(&peer_id).unwrap_or_else(|| peer_id.to_string());
                shared.status.lock().unwrap().connected_peers.retain(|p| p != &label);
            }
        }
        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            tracing::debug!("Outgoing connection error to {peer_id:?}: {error}");
        }
        SwarmEvent::Behaviour(behaviour_event) => {
            handle_behaviour_event(shared, swarm, behaviour_event);
        }
        _ => {}
    }
}

fn handle_behaviour_event(
    shared: &Arc<Shared>,
    swarm: &mut Swarm<WarrenBehaviour>,
    event: WarrenBehaviourEvent,
) {
    match event {
        WarrenBehaviourEvent::RequestResponse(request_response::Event::Message {
            peer,
            message,
            ..
        }) => match message {
            request_response::Message::Request { request, channel, .. } => {
                handle_inbound(shared, swarm, peer, request, channel);
            }
            request_response::Message::Response { response, .. } => {
                tracing::trace!("Ack from {peer}: {}", response.status);
            }
        },
        // Best-effort transport: request errors are swallowed.
        WarrenBehaviourEvent::RequestResponse(request_response::Event::OutboundFailure {
            peer,
            error,
            ..
        }) => {
            tracing::debug!("Outbound request to {peer} failed: {error}");
        }
        WarrenBehaviourEvent::RequestResponse(request_response::Event::InboundFailure {
            peer,
            error,
            ..
        }) => {
            tracing::debug!("Inbound request from {peer} failed: {error}");
        }
        WarrenBehaviourEvent::RequestResponse(_) => {}

        WarrenBehaviourEvent::Mdns(mdns::Event::Discovered(peers)) => {
            for (peer_id, addr) in peers {
                tracing::debug!("Multicast discovered {peer_id} at {addr}");
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                let _ = swarm.dial(peer_id);
            }
        }
        WarrenBehaviourEvent::Mdns(mdns::Event::Expired(peers)) => {
            for (peer_id, _addr) in peers {
                tracing::trace!("Multicast peer expired: {peer_id}");
            }
        }

        WarrenBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
            for addr in &info.listen_addrs {
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
            }
        }
        WarrenBehaviourEvent::Identify(_) => {}

        WarrenBehaviourEvent::Kademlia(kad::Event::RoutingUpdated { peer, .. }) => {
            tracing::trace!("Routing updated: {peer}");
        }
        WarrenBehaviourEvent::Kademlia(_) => {}
    }
}

fn handle_inbound(
    shared: &Arc<Shared>,
    swarm: &mut Swarm<WarrenBehaviour>,
    peer: PeerId,
    frame: RequestFrame,
    channel: request_response::ResponseChannel<ResponseFrame>,
) {
    let Some(route) = frame.path.strip_prefix(ROUTE_PREFIX) else {
        respond(swarm, channel, STATUS_NOT_FOUND);
        return;
    };

    let Some(source) = address_for_peer(&peer) else {
        // No recoverable public key means no way to verify anything the
        // peer sends.
        respond(swarm, channel, STATUS_BAD_REQUEST);
        return;
    };

    // Acknowledge first so the requester doesn't wait on the queue.
    respond(swarm, channel, STATUS_NO_CONTENT);

    let packet = Packet {
        peer: source,
        method: frame.method,
        route: route.to_string(),
        data: frame.body,
    };

    if shared.rxq_tx.try_send(packet).is_err() {
        tracing::debug!("Receive queue full; dropping inbound packet from {peer}");
    }
}

fn respond(
    swarm: &mut Swarm<WarrenBehaviour>,
    channel: request_response::ResponseChannel<ResponseFrame>,
    status: u16,
) {
    let _ = swarm
        .behaviour_mut()
        .request_response
        .send_response(channel, ResponseFrame { status });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use warren_proto::ROUTE_HEARTBEAT;

    fn loopback_config() -> RadioConfig {
        let mut conf = RadioConfig::new(SigningKey::generate(&mut OsRng));
        conf.listen_tcp = Some("127.0.0.1:0".parse().unwrap());
        conf
    }

    async fn wait_listening(radio: &Radio) -> Vec<Multiaddr> {
        for _ in 0..100 {
            let addrs = radio.dial_addrs();
            if !addrs.is_empty() {
                return addrs;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("radio never started listening");
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let radio = Radio::new(loopback_config());
        assert!(!radio.is_running());

        radio.start().await.unwrap();
        assert!(radio.is_running());

        // Second start while running is a no-op.
        radio.start().await.unwrap();
        assert!(radio.is_running());

        radio.stop().await;
        assert!(!radio.is_running());

        // Stop when not running is a no-op.
        radio.stop().await;
        assert!(!radio.is_running());
    }

    #[tokio::test]
    async fn restart_yields_running_instance() {
        let radio = Radio::new(loopback_config());
        radio.start().await.unwrap();
        wait_listening(&radio).await;

        radio.restart().await.unwrap();
        assert!(radio.is_running());
        radio.stop().await;
    }

    #[tokio::test]
    async fn send_and_recv_fail_once_stopped() {
        let radio = Radio::new(loopback_config());

        let packet = Packet::post("00".repeat(32), ROUTE_HEARTBEAT, vec![]);
        assert!(matches!(radio.send(packet.clone()).await, Err(RadioError::Stopped)));
        assert!(matches!(radio.recv().await, Err(RadioError::Stopped)));

        radio.start().await.unwrap();
        radio.send(packet.clone()).await.unwrap();

        radio.stop().await;
        assert!(matches!(radio.send(packet).await, Err(RadioError::Stopped)));
        assert!(matches!(radio.recv().await, Err(RadioError::Stopped)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn packets_flow_between_two_radios() {
        let a = Radio::new(loopback_config());
        a.start().await.unwrap();
        let a_addrs = wait_listening(&a).await;

        let mut b_conf = loopback_config();
        b_conf.listen_tcp = None;
        b_conf.static_peers = a_addrs;
        let b = Radio::new(b_conf);
        b.start().await.unwrap();

        // Give the dial a moment, then post a packet from b to a.
        tokio::time::sleep(Duration::from_millis(300)).await;
        b.send(Packet::post(a.local_address(), ROUTE_HEARTBEAT, b"hello".to_vec()))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), a.recv())
            .await
            .expect("timed out waiting for packet")
            .unwrap();

        assert_eq!(received.peer, b.local_address());
        assert_eq!(received.route, ROUTE_HEARTBEAT);
        assert_eq!(received.data, b"hello");

        b.stop().await;
        a.stop().await;
    }
}
