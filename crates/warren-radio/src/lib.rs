//! The radio owns this process's overlay mesh node.
//!
//! It exposes a packet-level data plane (send / receive, addressed by hex
//! public key) on top of a request/response wire protocol, and a
//! start/stop/restart lifecycle with single-flight guarantees. Transport is
//! best-effort: outbound failures are swallowed, inbound requests are
//! acknowledged before processing.

pub mod address;
pub mod behaviour;
pub mod config;
pub mod radio;
pub mod wire;

pub use address::{address_for_peer, peer_id_for_address};
pub use config::RadioConfig;
pub use radio::{Radio, RadioError, RadioStatus};
