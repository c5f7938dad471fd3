//! The warren agent: joins the mesh, reports its presence to the controller
//! with jittered heartbeats, and executes signed request payloads against a
//! pluggable evaluator.

pub mod agent;
pub mod config;
pub mod errlog;
pub mod exchange;
pub mod hostinfo;
pub mod shm;

pub use agent::{Agent, AgentError, Evaluator};
pub use config::AgentConfig;
pub use errlog::ErrorLog;
pub use exchange::ExchangeEvaluator;
pub use shm::CellStore;
