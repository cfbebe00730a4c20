//! Foam Agent Client Library
//!
//! Conversation state and job orchestration for a client that turns natural
//! language requirements into simulation jobs on a remote execution bridge.
//! The terminal front end lives in `src/main.rs`.

pub mod config;
pub mod error;
/// Job controller and its remote collaborators
///
/// Translation, submission and status polling, with single-flight runs.
pub mod orchestrator;
/// Application state management
///
/// Conversations, the reactive store and attachment handle lifecycle.
pub mod state;
pub mod util;

pub use config::Config;
pub use error::AppError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunHandle, RunPhase};
pub use state::{Snapshot, Store};
