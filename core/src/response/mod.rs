//! Streaming response orchestration: one [`ResponseOrchestrator`] per
//! outgoing chat message, driving the [`translator`] state machine.

pub mod orchestrator;
pub mod translator;

pub use orchestrator::{OrchestratorHandle, ResponseOrchestrator, RunContext, TIMEOUT_MESSAGE};
pub use translator::{translate, Effect, RunPhase, RunState, FLUSH_INTERVAL, GENERIC_ERROR};
