//! Shared vocabulary for the arbor agent runtime: identifiers, the fixed
//! event vocabulary and its payloads, conversation messages, model
//! selection, and the narrow traits through which the engine talks to the
//! rendering and provider collaborators.

pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod render;
pub mod replay;
pub mod tools;
