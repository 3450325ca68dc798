//! Agent lifecycle and event-sourced replay.
//!
//! [`AgentManager`] owns the live agent tree. At startup
//! [`AgentManager::restore`] rebuilds it from the registry and the event
//! log; afterwards forks, kills and commands mutate the log first and the
//! tree second.

pub mod agent;
pub mod barrier;
pub mod commands;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod marks;
pub mod registry;
pub mod replay;
pub mod restore;
pub mod tools;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use agent::Agent;
pub use barrier::ForkBarrier;
pub use commands::dispatch;
pub use error::EngineError;
pub use lifecycle::{AgentManager, CascadeReport, CommandOutcome, ManagerConfig};
pub use restore::RestoreReport;
pub use tree::AgentTree;
