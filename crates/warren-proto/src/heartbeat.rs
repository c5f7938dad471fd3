use serde::{Deserialize, Serialize};

/// The structure of heartbeats agents send to the c2 to register their
/// status and presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// A unique fingerprint of the family/strain this agent belongs to.
    pub strain_id: String,

    /// When this agent was initialised (unix seconds).
    pub init_time: u64,

    /// Names of the modules installed in this agent.
    pub modules: Vec<String>,

    /// The operating system the agent is running on.
    pub host_os: String,

    /// The CPU architecture of the host.
    pub host_arch: String,

    /// The system hostname.
    pub hostname: String,

    /// The name of the user under which the agent is running.
    pub host_user: String,

    /// The ID of the user under which the agent is running.
    pub host_user_id: String,

    /// A count of errors the agent has encountered.
    pub errors: u32,
}
