//! Job orchestration
//!
//! The single-flight job controller and the collaborators it drives:
//! translation, the execution bridge and their wire types.

pub mod bridge_client;
pub mod controller;
pub mod messages;
pub mod translator;
pub mod types;

pub use bridge_client::{ExecutionBridge, HttpBridgeClient};
pub use controller::{Orchestrator, OrchestratorConfig, RunHandle, RunPhase, RunProgress};
pub use translator::{DeepSeekTranslator, Translator};
pub use types::{DownloadedArchive, HealthResponse, JobState, JobStatus, SubmittedJob};
