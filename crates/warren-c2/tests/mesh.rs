//! End-to-end mesh scenarios: real radios over loopback TCP, a controller
//! and agents with shortened timing constants.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;
use libp2p::Multiaddr;
use rand::rngs::OsRng;
use tokio::sync::watch;

use warren_agent::{Agent, AgentConfig, Evaluator};
use warren_c2::{ControlError, Controller, Registry, RegistryConfig};
use warren_proto::{
    marshal, Heartbeat, Packet, PacketRr, ROUTE_HEARTBEAT, ROUTE_RR,
};
use warren_radio::{Radio, RadioConfig};

const FAST_HEARTBEAT_MIN: Duration = Duration::from_secs(1);
const FAST_HEARTBEAT_MAX: Duration = Duration::from_secs(2);

// ============================================================================
// Harness
// ============================================================================

struct TestController {
    controller: Controller,
    radio: Arc<Radio>,
    address: String,
    dial_addrs: Vec<Multiaddr>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TestController {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
        self.radio.stop().await;
    }
}

async fn start_controller(conf: RegistryConfig, cleanup: Duration) -> TestController {
    let key = SigningKey::generate(&mut OsRng);
    let mut radio_conf = RadioConfig::new(key.clone());
    radio_conf.listen_tcp = Some("127.0.0.1:0".parse().unwrap());

    let radio = Radio::new(radio_conf);
    radio.start().await.unwrap();
    let dial_addrs = wait_dialable(&radio).await;

    let controller = Controller::new(radio.clone(), Registry::new(conf), key)
        .with_cleanup_interval(cleanup);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(shutdown_rx).await })
    };

    TestController {
        address: radio.local_address(),
        controller,
        radio,
        dial_addrs,
        shutdown,
        task,
    }
}

async fn wait_dialable(radio: &Radio) -> Vec<Multiaddr> {
    for _ in 0..100 {
        let addrs = radio.dial_addrs();
        if !addrs.is_empty() {
            return addrs;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("radio never started listening");
}

struct TestAgent {
    agent: Agent,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TestAgent {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

async fn start_agent(c2: &TestController, evaluator: Arc<dyn Evaluator>) -> TestAgent {
    let admin: [u8; 32] = hex::decode(&c2.address).unwrap().try_into().unwrap();

    let mut conf = AgentConfig::new(SigningKey::generate(&mut OsRng), admin);
    conf.static_peers = c2.dial_addrs.clone();
    conf.strain_id = "itest".to_string();
    conf.heartbeat_min = FAST_HEARTBEAT_MIN;
    conf.heartbeat_max = FAST_HEARTBEAT_MAX;

    let agent = Agent::new(conf, evaluator).unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = {
        let agent = agent.clone();
        tokio::spawn(async move {
            agent.run(shutdown_rx).await.unwrap();
        })
    };

    TestAgent { agent, shutdown, task }
}

async fn start_rogue(c2: &TestController) -> (Arc<Radio>, SigningKey) {
    let key = SigningKey::generate(&mut OsRng);
    let mut conf = RadioConfig::new(key.clone());
    conf.static_peers = c2.dial_addrs.clone();

    let radio = Radio::new(conf);
    radio.start().await.unwrap();
    // Give the static-peer dial a moment to complete.
    tokio::time::sleep(Duration::from_millis(300)).await;
    (radio, key)
}

async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn random_address() -> String {
    hex::encode(SigningKey::generate(&mut OsRng).verifying_key().to_bytes())
}

struct EchoEvaluator;

impl Evaluator for EchoEvaluator {
    fn evaluate(&self, payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_liveness() {
    let c2 = start_controller(
        RegistryConfig {
            client_expiry: Duration::from_secs(5),
            ..RegistryConfig::default()
        },
        Duration::from_secs(1),
    )
    .await;

    let agent = start_agent(&c2, Arc::new(EchoEvaluator)).await;
    let agent_address = agent.agent.address();

    let clients = c2.controller.registry().clients.clone();
    assert!(
        wait_until(Duration::from_secs(10), || clients.count() == 1).await,
        "agent never registered",
    );
    let (page, total) = clients.get_page(0, 10);
    assert_eq!(total, 1);
    assert_eq!(page[0].address, agent_address);
    assert_eq!(page[0].last_heartbeat.strain_id, "itest");

    // Stop the agent; once its record passes the expiry window the pruner
    // drops it.
    agent.stop().await;
    assert!(
        wait_until(Duration::from_secs(15), || clients.count() == 0).await,
        "dead agent never pruned",
    );

    c2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn request_response_round_trip() {
    let c2 = start_controller(RegistryConfig::default(), Duration::from_secs(30)).await;
    let agent = start_agent(&c2, Arc::new(EchoEvaluator)).await;
    let agent_address = agent.agent.address();

    let clients = c2.controller.registry().clients.clone();
    assert!(wait_until(Duration::from_secs(10), || clients.count() == 1).await);

    let response = c2
        .controller
        .send_request(&agent_address, b"ping".to_vec(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response.payload, b"ping");

    // The stored transaction is answered exactly once, by its own TxId.
    let record = c2
        .controller
        .registry()
        .transactions
        .get(&response.tx_id)
        .unwrap();
    assert_eq!(record.tx_id, response.tx_id);
    assert!(record.response_time.is_some());
    assert!(record.request_time <= record.response_time.unwrap());

    agent.stop().await;
    c2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn exchange_round_trip() {
    use ciborium::value::Value;
    use std::collections::BTreeMap;
    use warren_agent::{CellStore, ExchangeEvaluator};
    use warren_proto::ExchangeRequest;

    let c2 = start_controller(RegistryConfig::default(), Duration::from_secs(30)).await;

    let store = CellStore::default();
    let agent = start_agent(&c2, Arc::new(ExchangeEvaluator::new(store.clone()))).await;
    let agent_address = agent.agent.address();

    let clients = c2.controller.registry().clients.clone();
    assert!(wait_until(Duration::from_secs(10), || clients.count() == 1).await);

    let request = ExchangeRequest {
        set: BTreeMap::from([("w.mark".to_string(), Value::Text("lit".into()))]),
        get: vec!["w.mark".into()],
        ..ExchangeRequest::default()
    };
    let response = c2
        .controller
        .send_exchange(&agent_address, &request, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response.set, vec!["w.mark"]);
    assert_eq!(response.get.get("w.mark"), Some(&Value::Text("lit".into())));
    // The write landed in the agent's cell store.
    assert_eq!(store.get("w.mark"), Some(Value::Text("lit".into())));

    agent.stop().await;
    c2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn forged_response_is_rejected() {
    let c2 = start_controller(RegistryConfig::default(), Duration::from_secs(30)).await;
    let (rogue, rogue_key) = start_rogue(&c2).await;

    // A pending request addressed to some other client.
    let target = random_address();
    let request = c2
        .controller
        .registry()
        .transactions
        .create_request(&target, b"cmd".to_vec());

    // The rogue peer knows the TxId and signs a perfectly valid response
    // with its own key.
    let forged = PacketRr {
        payload: b"evil".to_vec(),
        tx_id: request.tx_id.clone(),
    };
    let data = marshal(&forged, &rogue_key).unwrap();
    rogue
        .send(Packet::post(&c2.address, ROUTE_RR, data))
        .await
        .unwrap();

    // The response must be dropped (source != target) and the waiter must
    // keep waiting until it times out.
    let err = c2
        .controller
        .registry()
        .transactions
        .await_response(&request.tx_id, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timeout"));

    let record = c2
        .controller
        .registry()
        .transactions
        .get(&request.tx_id)
        .unwrap();
    assert!(record.response_time.is_none());
    assert!(record.response.is_none());

    rogue.stop().await;
    c2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_surfaces_correctly() {
    let c2 = start_controller(RegistryConfig::default(), Duration::from_secs(30)).await;

    let started = Instant::now();
    let err = c2
        .controller
        .send_request(&random_address(), b"ping".to_vec(), Duration::from_secs(2))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ControlError::Await(_)), "got: {err}");
    assert!(err.to_string().contains("timeout"), "got: {err}");
    assert!(elapsed >= Duration::from_millis(1_500), "returned too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(4), "returned too late: {elapsed:?}");

    c2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn fanout_preserves_independence() {
    let c2 = start_controller(
        RegistryConfig {
            client_expiry: Duration::from_secs(120),
            ..RegistryConfig::default()
        },
        Duration::from_secs(60),
    )
    .await;

    let mut agents = Vec::new();
    for _ in 0..9 {
        agents.push(start_agent(&c2, Arc::new(EchoEvaluator)).await);
    }

    let clients = c2.controller.registry().clients.clone();
    assert!(
        wait_until(Duration::from_secs(15), || clients.count() == 9).await,
        "not all agents registered",
    );

    // A tenth client that is known to the registry but unreachable: its
    // send times out while the rest answer normally.
    let phantom = random_address();
    clients.upsert(&phantom, Heartbeat::default());

    let started = Instant::now();
    let outcome = c2
        .controller
        .send_to_all(b"task", Duration::from_secs(5))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.results.len(), 10);
    assert_eq!(outcome.errored, 1);
    assert_eq!(
        outcome.aggregate().unwrap_err().to_string(),
        "1 sends errored",
    );

    for (address, result) in &outcome.results {
        if address == &phantom {
            assert!(result.is_err());
        } else {
            assert_eq!(result.as_ref().unwrap().payload, b"task");
        }
    }

    // One unresponsive target only costs its own timeout, not the sum.
    assert!(elapsed < Duration::from_secs(10), "fan-out serialized: {elapsed:?}");

    for agent in agents {
        agent.stop().await;
    }
    c2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_packet_is_silent() {
    let c2 = start_controller(RegistryConfig::default(), Duration::from_secs(30)).await;
    let (rogue, _) = start_rogue(&c2).await;

    // A 10-byte body cannot even hold a signature. The controller must
    // acknowledge the transfer and change nothing.
    rogue
        .send(Packet::post(&c2.address, ROUTE_HEARTBEAT, vec![0u8; 10]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(c2.controller.registry().clients.count(), 0);

    rogue.stop().await;
    c2.stop().await;
}
