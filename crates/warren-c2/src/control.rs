//! The controller mainloop: ingest heartbeats and responses off the radio,
//! run the registry pruner, and provide the send-and-await / fan-out
//! primitives the admin surface is built on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use warren_proto::{
    marshal, parse_public_hex, unmarshal, CodecError, ExchangeRequest, ExchangeResponse,
    Heartbeat, Packet, PacketRr, ROUTE_HEARTBEAT, ROUTE_RR, STATE_CLEANUP_INTERVAL,
};
use warren_radio::{Radio, RadioError};

use crate::registry::{AwaitError, Registry};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error(transparent)]
    Await(#[from] AwaitError),

    #[error("{0} sends errored")]
    Fanout(u64),
}

/// The per-target results of a fan-out send.
pub struct FanoutOutcome {
    pub results: Vec<(String, Result<PacketRr, ControlError>)>,
    pub errored: u64,
}

impl FanoutOutcome {
    /// The aggregate error when any target failed.
    pub fn aggregate(&self) -> Result<(), ControlError> {
        if self.errored > 0 {
            Err(ControlError::Fanout(self.errored))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Clone)]
pub struct Controller {
    radio: Arc<Radio>,
    registry: Registry,
    identity: Arc<SigningKey>,
    cleanup_interval: Duration,
}

impl Controller {
    pub fn new(radio: Arc<Radio>, registry: Registry, identity: SigningKey) -> Self {
        Self {
            radio,
            registry,
            identity: Arc::new(identity),
            cleanup_interval: STATE_CLEANUP_INTERVAL,
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn radio(&self) -> &Arc<Radio> {
        &self.radio
    }

    // ========================================================================
    // Mainloop
    // ========================================================================

    /// Ingest packets and prune state until `shutdown` fires or the radio
    /// stops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut cleanup = tokio::time::interval(self.cleanup_interval);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        cleanup.tick().await;

        loop {
            tokio::select! {
                _ = wait_signal(&mut shutdown) => break,
                _ = cleanup.tick() => self.registry.prune().await,
                packet = self.radio.recv() => match packet {
                    Ok(packet) => self.dispatch(packet),
                    Err(_) => break,
                },
            }
        }
    }

    fn dispatch(&self, packet: Packet) {
        // Every payload is verified against the key the packet claims to
        // come from; the overlay guarantees the claim matches the sender.
        let verification_key = match parse_public_hex(&packet.peer) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("Dropping packet with unusable peer address: {e}");
                return;
            }
        };

        match packet.route.as_str() {
            ROUTE_HEARTBEAT => match unmarshal::<Heartbeat>(&packet.data, &verification_key) {
                Ok(heartbeat) => {
                    tracing::debug!(client = %packet.peer, "Heartbeat");
                    self.registry.clients.upsert(&packet.peer, heartbeat);
                }
                Err(e) => tracing::debug!("Dropping heartbeat from {}: {e}", packet.peer),
            },
            ROUTE_RR => match unmarshal::<PacketRr>(&packet.data, &verification_key) {
                Ok(response) => {
                    let tx_id = response.tx_id.clone();
                    if self.registry.transactions.accept_response(&packet.peer, response) {
                        tracing::debug!(client = %packet.peer, tx_id, "Response accepted");
                    } else {
                        tracing::debug!(client = %packet.peer, tx_id, "Response rejected");
                    }
                }
                Err(e) => tracing::debug!("Dropping response from {}: {e}", packet.peer),
            },
            other => tracing::trace!("Dropping packet on unknown route `{other}`"),
        }
    }

    // ========================================================================
    // Send primitives
    // ========================================================================

    /// Issue a request to one client and wait for the matching response.
    pub async fn send_request(
        &self,
        target: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<PacketRr, ControlError> {
        let request = self.registry.transactions.create_request(target, payload);
        let data = marshal(&request, &self.identity)?;

        self.radio
            .send(Packet::post(target, ROUTE_RR, data))
            .await?;

        Ok(self
            .registry
            .transactions
            .await_response(&request.tx_id, timeout)
            .await?)
    }

    /// Issue a cell-store exchange command to one client and decode its
    /// result.
    pub async fn send_exchange(
        &self,
        target: &str,
        request: &ExchangeRequest,
        timeout: Duration,
    ) -> Result<ExchangeResponse, ControlError> {
        let payload = request.to_bytes()?;
        let response = self.send_request(target, payload, timeout).await?;
        Ok(ExchangeResponse::from_bytes(&response.payload)?)
    }

    /// Issue the same request to many clients concurrently. Targets do not
    /// block one another; a slow client only delays its own slot in the
    /// outcome.
    pub async fn send_to_many(
        &self,
        targets: &[String],
        payload: &[u8],
        timeout: Duration,
    ) -> FanoutOutcome {
        let errored = Arc::new(AtomicU64::new(0));
        let mut tasks = JoinSet::new();

        for target in targets {
            let controller = self.clone();
            let target = target.clone();
            let payload = payload.to_vec();
            let errored = errored.clone();
            tasks.spawn(async move {
                let result = controller.send_request(&target, payload, timeout).await;
                if result.is_err() {
                    errored.fetch_add(1, Ordering::Relaxed);
                }
                (target, result)
            });
        }

        let mut results = Vec::with_capacity(targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    errored.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Fan-out task failed: {e}");
                }
            }
        }

        FanoutOutcome {
            results,
            errored: errored.load(Ordering::Relaxed),
        }
    }

    /// Issue the same request to every known client.
    pub async fn send_to_all(&self, payload: &[u8], timeout: Duration) -> FanoutOutcome {
        let targets: Vec<String> = self
            .registry
            .clients
            .get_all_except(&[])
            .into_iter()
            .map(|c| c.address)
            .collect();
        self.send_to_many(&targets, payload, timeout).await
    }
}

async fn wait_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
