//! In-memory state the controller keeps about the fleet: the table of known
//! clients and the table of in-flight request/response transactions.
//!
//! Both tables are owned exclusively by the registry; every mutation flows
//! through the operations here. Each table is linearizable on its own lock;
//! there are no cross-table transactions — a response is accepted by TxId
//! even if its client has just been pruned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use warren_proto::{
    Heartbeat, PacketRr, HEARTBEAT_MARK_DEAD_DELAY, STATE_REQUEST_EXPIRY_DELAY,
};

/// Hard cap on the page size served by [`ClientTable::get_page`].
pub const MAX_PAGE_LIMIT: usize = 100;

// ============================================================================
// Records
// ============================================================================

/// One known client, created on its first heartbeat and refreshed on every
/// subsequent one.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Hex public key; primary key, unique.
    pub address: String,
    pub first_heartbeat_time: SystemTime,
    pub last_heartbeat_time: SystemTime,
    pub last_heartbeat: Heartbeat,
}

/// One request/response transaction. Answered exactly once: `response_time`
/// is set the moment a matching response from the right source arrives and
/// is never overwritten.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub tx_id: String,
    /// Hex public key of the client the request was addressed to.
    pub target: String,
    pub request_time: SystemTime,
    pub request: PacketRr,
    pub response_time: Option<SystemTime>,
    pub response: Option<PacketRr>,
}

#[derive(Debug, Error)]
pub enum AwaitError {
    #[error("no transaction with id `{0}`")]
    NotFound(String),

    #[error("timeout waiting for response to request `{0}`")]
    Timeout(String),
}

// ============================================================================
// Clients table
// ============================================================================

#[derive(Clone, Default)]
pub struct ClientTable {
    inner: Arc<RwLock<HashMap<String, ClientRecord>>>,
}

impl ClientTable {
    /// Save or update a client entry. The first heartbeat creates the record;
    /// later ones only refresh `last_heartbeat_time` and the payload.
    pub fn upsert(&self, source: &str, heartbeat: Heartbeat) {
        let now = SystemTime::now();
        let mut table = self.inner.write().unwrap();
        let entry = table
            .entry(source.to_string())
            .or_insert_with(|| ClientRecord {
                address: source.to_string(),
                first_heartbeat_time: now,
                last_heartbeat_time: now,
                last_heartbeat: heartbeat.clone(),
            });
        entry.last_heartbeat_time = now;
        entry.last_heartbeat = heartbeat;
    }

    pub fn get(&self, address: &str) -> Option<ClientRecord> {
        self.inner.read().unwrap().get(address).cloned()
    }

    /// Return one page of clients ordered by first-heartbeat time (ties
    /// broken by address), along with the total count.
    pub fn get_page(&self, offset: usize, limit: usize) -> (Vec<ClientRecord>, u64) {
        let limit = limit.min(MAX_PAGE_LIMIT);
        let table = self.inner.read().unwrap();
        let total = table.len() as u64;

        let mut clients: Vec<ClientRecord> = table.values().cloned().collect();
        clients.sort_by(|a, b| {
            a.first_heartbeat_time
                .cmp(&b.first_heartbeat_time)
                .then_with(|| a.address.cmp(&b.address))
        });

        (clients.into_iter().skip(offset).take(limit).collect(), total)
    }

    pub fn get_many(&self, addresses: &[String]) -> Vec<ClientRecord> {
        let table = self.inner.read().unwrap();
        addresses
            .iter()
            .filter_map(|a| table.get(a).cloned())
            .collect()
    }

    pub fn get_all_except(&self, addresses: &[String]) -> Vec<ClientRecord> {
        self.inner
            .read()
            .unwrap()
            .values()
            .filter(|c| !addresses.contains(&c.address))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> u64 {
        self.inner.read().unwrap().len() as u64
    }

    pub fn delete(&self, address: &str) -> bool {
        self.inner.write().unwrap().remove(address).is_some()
    }

    /// Delete clients whose last heartbeat is older than `expiry`.
    /// Returns how many were removed.
    pub fn prune(&self, expiry: Duration) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(expiry) else {
            return 0;
        };
        let mut table = self.inner.write().unwrap();
        let before = table.len();
        table.retain(|_, c| c.last_heartbeat_time > cutoff);
        before - table.len()
    }
}

// ============================================================================
// Transactions table
// ============================================================================

#[derive(Clone, Default)]
pub struct TransactionTable {
    inner: Arc<Mutex<TxInner>>,
}

#[derive(Default)]
struct TxInner {
    records: HashMap<String, TransactionRecord>,
    /// Per-TxId wakeups for `await_response`; removed on completion, timeout
    /// and prune.
    waiters: HashMap<String, Vec<oneshot::Sender<PacketRr>>>,
}

impl TransactionTable {
    /// Save a request addressed to `target` and allocate its TxId.
    pub fn create_request(&self, target: &str, payload: Vec<u8>) -> PacketRr {
        let tx_id = Uuid::new_v4().to_string();
        let request = PacketRr {
            payload,
            tx_id: tx_id.clone(),
        };

        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(
            tx_id.clone(),
            TransactionRecord {
                tx_id,
                target: target.to_string(),
                request_time: SystemTime::now(),
                request: request.clone(),
                response_time: None,
                response: None,
            },
        );

        request
    }

    /// Save a response to a request. Accepted only when the response's TxId
    /// is known, the sender matches the request's target, and the
    /// transaction has not been answered yet. Returns whether it was
    /// accepted; rejected responses leave the record untouched.
    pub fn accept_response(&self, source: &str, response: PacketRr) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let Some(record) = inner.records.get_mut(&response.tx_id) else {
            return false;
        };
        if record.target != source || record.response_time.is_some() {
            return false;
        }

        record.response_time = Some(SystemTime::now());
        record.response = Some(response.clone());

        if let Some(waiters) = inner.waiters.remove(&response.tx_id) {
            for waiter in waiters {
                let _ = waiter.send(response.clone());
            }
        }

        true
    }

    pub fn get(&self, tx_id: &str) -> Option<TransactionRecord> {
        self.inner.lock().unwrap().records.get(tx_id).cloned()
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().unwrap().records.len() as u64
    }

    /// Wait until the transaction is answered, up to `timeout`.
    ///
    /// The transaction record stays in the table either way: a late response
    /// that arrives before the prune window closes is still accepted.
    pub async fn await_response(
        &self,
        tx_id: &str,
        timeout: Duration,
    ) -> Result<PacketRr, AwaitError> {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            match inner.records.get(tx_id) {
                None => return Err(AwaitError::NotFound(tx_id.to_string())),
                Some(record) => {
                    if let Some(response) = &record.response {
                        return Ok(response.clone());
                    }
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.entry(tx_id.to_string()).or_default().push(tx);
                    rx
                }
            }
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The sender was dropped: the transaction was pruned while we
            // were waiting.
            Ok(Err(_)) => Err(AwaitError::NotFound(tx_id.to_string())),
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(waiters) = inner.waiters.get_mut(tx_id) {
                    waiters.retain(|w| !w.is_closed());
                    if waiters.is_empty() {
                        inner.waiters.remove(tx_id);
                    }
                }
                Err(AwaitError::Timeout(tx_id.to_string()))
            }
        }
    }

    /// Delete transactions whose request is older than `expiry`, waking any
    /// waiters with a not-found result. Returns how many were removed.
    pub fn prune(&self, expiry: Duration) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(expiry) else {
            return 0;
        };
        let mut inner = self.inner.lock().unwrap();

        let expired: Vec<String> = inner
            .records
            .values()
            .filter(|r| r.request_time <= cutoff)
            .map(|r| r.tx_id.clone())
            .collect();

        for tx_id in &expired {
            inner.records.remove(tx_id);
            inner.waiters.remove(tx_id);
        }

        expired.len()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Clients whose last heartbeat is older than this are pruned.
    pub client_expiry: Duration,
    /// Transactions whose request is older than this are pruned.
    pub request_expiry: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            client_expiry: HEARTBEAT_MARK_DEAD_DELAY,
            request_expiry: STATE_REQUEST_EXPIRY_DELAY,
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    pub clients: ClientTable,
    pub transactions: TransactionTable,
    conf: RegistryConfig,
}

impl Registry {
    pub fn new(conf: RegistryConfig) -> Self {
        Self {
            clients: ClientTable::default(),
            transactions: TransactionTable::default(),
            conf,
        }
    }

    /// Expire timed-out entries in both tables. The tables prune
    /// concurrently; both are awaited before this returns.
    pub async fn prune(&self) {
        let clients = self.clients.clone();
        let client_expiry = self.conf.client_expiry;
        let transactions = self.transactions.clone();
        let request_expiry = self.conf.request_expiry;

        let (pruned_clients, pruned_txs) = tokio::join!(
            tokio::spawn(async move { clients.prune(client_expiry) }),
            tokio::spawn(async move { transactions.prune(request_expiry) }),
        );

        let pruned_clients = pruned_clients.unwrap_or(0);
        let pruned_txs = pruned_txs.unwrap_or(0);
        if pruned_clients > 0 || pruned_txs > 0 {
            tracing::debug!(
                "Pruned {pruned_clients} stale clients and {pruned_txs} expired transactions",
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
