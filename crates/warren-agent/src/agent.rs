use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use zeroize::Zeroize;

use warren_proto::{
    marshal, unmarshal, Heartbeat, Packet, PacketRr, ROUTE_HEARTBEAT, ROUTE_RR,
};
use warren_radio::{Radio, RadioConfig, RadioError};

use crate::{config::AgentConfig, errlog::ErrorLog, hostinfo};

/// Evaluates request payloads on the agent. What the bytes mean is up to
/// the host embedding the agent; the default is the cell-store exchange.
///
/// Implementations may block; evaluation runs on a blocking worker and
/// panics are caught and recorded.
pub trait Evaluator: Send + Sync + 'static {
    fn evaluate(&self, payload: &[u8]) -> Vec<u8>;
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Radio(#[from] RadioError),
}

// ============================================================================
// Agent
// ============================================================================

/// One warren agent instance.
///
/// Cheap to clone; request handlers run on clones in their own tasks.
#[derive(Clone)]
pub struct Agent {
    radio: Arc<Radio>,
    identity: Arc<SigningKey>,
    /// The only key allowed to drive this agent.
    admin_key: VerifyingKey,
    /// Hex address of the controller; heartbeats and responses go here.
    admin_address: String,
    strain_id: String,
    modules: Vec<String>,
    heartbeat_min: Duration,
    heartbeat_max: Duration,
    init_time: u64,
    errors: ErrorLog,
    evaluator: Arc<dyn Evaluator>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("admin_address", &self.admin_address)
            .field("strain_id", &self.strain_id)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Validate the configuration and construct the agent. The admin key is
    /// copied into the agent and scrubbed from the configuration struct.
    pub fn new(mut conf: AgentConfig, evaluator: Arc<dyn Evaluator>) -> Result<Self, AgentError> {
        let admin_key = VerifyingKey::from_bytes(&conf.admin_key)
            .map_err(|_| AgentError::Config("admin key is not a valid Ed25519 key".into()))?;
        conf.admin_key.zeroize();

        if conf.heartbeat_min >= conf.heartbeat_max {
            return Err(AgentError::Config(
                "heartbeat interval minimum must be below the maximum".into(),
            ));
        }

        let identity = conf.identity.clone();
        let mut radio_conf = RadioConfig::new(conf.identity);
        radio_conf.listen_tcp = conf.listen_tcp;
        radio_conf.listen_ws = conf.listen_ws;
        radio_conf.use_multicast = conf.use_multicast;
        radio_conf.static_peers = conf.static_peers;
        if !radio_conf.has_peering() {
            return Err(AgentError::Config(
                "no way for peers to connect was specified".into(),
            ));
        }

        let init_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            radio: Radio::new(radio_conf),
            identity: Arc::new(identity),
            admin_key,
            admin_address: hex::encode(admin_key.to_bytes()),
            strain_id: conf.strain_id,
            modules: conf.modules,
            heartbeat_min: conf.heartbeat_min,
            heartbeat_max: conf.heartbeat_max,
            init_time,
            errors: ErrorLog::default(),
            evaluator,
        })
    }

    pub fn radio(&self) -> &Arc<Radio> {
        &self.radio
    }

    /// This agent's mesh address.
    pub fn address(&self) -> String {
        self.radio.local_address()
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    // ========================================================================
    // Mainloop
    // ========================================================================

    /// Start the radio and run until `shutdown` fires. Joins the heartbeat
    /// emitter and stops the radio before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        self.radio.start().await?;

        tracing::info!(address = %self.address(), "Agent running");

        let (heartbeat_exit_tx, heartbeat_exit_rx) = watch::channel(false);
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop(heartbeat_exit_rx));

        loop {
            tokio::select! {
                _ = wait_signal(&mut shutdown) => break,
                packet = self.radio.recv() => match packet {
                    Ok(packet) if packet.route == ROUTE_RR => {
                        // Each request is handled in its own task; there is
                        // no ordering between concurrent requests.
                        tokio::spawn(self.clone().handle_request(packet));
                    }
                    Ok(packet) => {
                        tracing::trace!("Ignoring packet on route `{}`", packet.route);
                    }
                    Err(_) => break,
                },
            }
        }

        let _ = heartbeat_exit_tx.send(true);
        let _ = heartbeat.await;
        self.radio.stop().await;
        Ok(())
    }

    // ========================================================================
    // Heartbeats
    // ========================================================================

    async fn heartbeat_loop(self, mut exit: watch::Receiver<bool>) {
        let facts = hostinfo::collect();

        loop {
            // Pick an interval between min and max for the next heartbeat.
            let interval = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(
                    self.heartbeat_min.as_millis() as u64..self.heartbeat_max.as_millis() as u64,
                ))
            };

            tokio::select! {
                _ = wait_signal(&mut exit) => return,
                _ = tokio::time::sleep(interval) => {
                    let heartbeat = Heartbeat {
                        strain_id: self.strain_id.clone(),
                        init_time: self.init_time,
                        modules: self.modules.clone(),
                        host_os: facts.os.clone(),
                        host_arch: facts.arch.clone(),
                        hostname: facts.hostname.clone(),
                        host_user: facts.user.clone(),
                        host_user_id: facts.user_id.clone(),
                        errors: self.errors.count(),
                    };

                    let data = match marshal(&heartbeat, &self.identity) {
                        Ok(data) => data,
                        Err(e) => {
                            self.errors.record(format!("marshalling heartbeat failed: {e}"));
                            continue;
                        }
                    };

                    // Fire and forget; if the controller is unreachable there
                    // is nothing to do but try again next interval.
                    if let Err(e) = self
                        .radio
                        .send(Packet::post(&self.admin_address, ROUTE_HEARTBEAT, data))
                        .await
                    {
                        tracing::debug!("Heartbeat send failed: {e}");
                    }
                }
            }
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    async fn handle_request(self, packet: Packet) {
        // Requests are only accepted from the controller: compare the source
        // key byte-for-byte before even looking at the payload.
        let Ok(peer_key) = hex::decode(&packet.peer) else {
            return;
        };
        if peer_key != self.admin_key.to_bytes() {
            return;
        }

        let Ok(request) = unmarshal::<PacketRr>(&packet.data, &self.admin_key) else {
            // The packet data is malformed; there is nothing more we can do.
            return;
        };

        let evaluator = self.evaluator.clone();
        let payload = request.payload.clone();
        let output = match tokio::task::spawn_blocking(move || evaluator.evaluate(&payload)).await
        {
            Ok(output) => output,
            Err(e) if e.is_panic() => {
                self.errors
                    .record(format!("command in request `{}` panicked", request.tx_id));
                format!("payload evaluator panicked while handling `{}`", request.tx_id)
                    .into_bytes()
            }
            Err(_) => return,
        };

        let response = PacketRr {
            payload: output,
            tx_id: request.tx_id,
        };

        let data = match marshal(&response, &self.identity) {
            Ok(data) => data,
            Err(e) => {
                // Without the TxId on the wire the c2 can't correlate
                // anything, so there is no point sending a reply.
                self.errors
                    .record(format!("marshalling response to `{}` failed: {e}", response.tx_id));
                return;
            }
        };

        if let Err(e) = self
            .radio
            .send(Packet::post(&packet.peer, ROUTE_RR, data))
            .await
        {
            tracing::debug!("Response send failed: {e}");
        }
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
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    struct NullEvaluator;

    impl Evaluator for NullEvaluator {
        fn evaluate(&self, _payload: &[u8]) -> Vec<u8> {
            Vec::new()
        }
    }

    fn base_config() -> AgentConfig {
        let admin = SigningKey::generate(&mut OsRng);
        let mut conf = AgentConfig::new(
            SigningKey::generate(&mut OsRng),
            admin.verifying_key().to_bytes(),
        );
        conf.use_multicast = true;
        conf
    }

    #[test]
    fn valid_config_is_accepted() {
        let agent = Agent::new(base_config(), Arc::new(NullEvaluator)).unwrap();
        assert_eq!(agent.address().len(), 64);
    }

    #[test]
    fn peering_is_required() {
        let mut conf = base_config();
        conf.use_multicast = false;
        let err = Agent::new(conf, Arc::new(NullEvaluator)).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn degenerate_heartbeat_interval_is_rejected() {
        let mut conf = base_config();
        conf.heartbeat_min = Duration::from_secs(10);
        conf.heartbeat_max = Duration::from_secs(10);
        let err = Agent::new(conf, Arc::new(NullEvaluator)).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
