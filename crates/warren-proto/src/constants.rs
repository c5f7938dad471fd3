// ============================================================================
// Protocol constants
// ============================================================================

use std::time::Duration;

/// The version of the warren wire protocol supported by this build.
/// Updated whenever a breaking change is made to the protocol.
pub const PROTO_VERSION: &str = "opal";

/// Wire protocol identifier negotiated between mesh peers.
pub const WIRE_PROTOCOL: &str = "/_wpc/opal";

/// The prefix for all warren overlay routes.
pub const ROUTE_PREFIX: &str = "/_wpc/opal/";

// --- Routes -----------------------------------------------------------------
//
// The overlay HTTP surface is deliberately tiny:
//
// - HEARTBEAT: agents hit this endpoint on the c2 to report their presence.
// - RR: bi-directional request/response correlated by TxId. The c2 posts
//   requests here; agents post their responses back on the same route.

pub const ROUTE_HEARTBEAT: &str = "heartbeat";
pub const ROUTE_RR: &str = "rr";

// --- Identity ---------------------------------------------------------------

/// Ed25519 public key length; the hex encoding of this is a peer's address.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 keypair length (seed followed by public key).
pub const KEYPAIR_LEN: usize = 64;

/// Ed25519 signature length; every signed payload starts with this many bytes.
pub const SIGNATURE_LEN: usize = 64;

// --- Transport --------------------------------------------------------------

/// Maximum wire frame size in bytes (envelope + signed payload).
pub const MAX_FRAME_SIZE: usize = 65_536;

// --- Timing -----------------------------------------------------------------

/// Bounds for the jittered heartbeat interval. Each agent sleeps a uniform
/// random duration in `[MIN, MAX)` between heartbeats.
pub const HEARTBEAT_INTERVAL_MIN: Duration = Duration::from_secs(20);
pub const HEARTBEAT_INTERVAL_MAX: Duration = Duration::from_secs(40);

/// How long after its last heartbeat a client is considered dead
/// (2 x HEARTBEAT_INTERVAL_MAX + 1s, so two consecutive misses are needed).
pub const HEARTBEAT_MARK_DEAD_DELAY: Duration = Duration::from_secs(81);

/// How often the controller prunes stale clients and expired transactions.
pub const STATE_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// How long an unanswered transaction is kept before it is pruned.
pub const STATE_REQUEST_EXPIRY_DELAY: Duration = Duration::from_secs(600);
