pub mod agent;
pub mod agents;
pub mod chat;
pub mod config;
pub mod events;
pub mod response;
pub mod session;
pub mod tools;

#[cfg(test)]
mod tests;

// Re-export main types for convenience
pub use agent::{AgentError, AgentFactory, AgentPlatform, AssistantApi, RunEvent, RunStream};
pub use agents::{AgentRegistry, ChatFactory, StartOutcome};
pub use chat::{AiState, ChatClient, ChatError, IndicatorEvent};
pub use config::{Config, ConfigError};
pub use events::{ChannelRef, ChatEvent, EventBus, InboundMessage};
pub use response::{OrchestratorHandle, ResponseOrchestrator, RunPhase};
pub use session::{AgentSession, SessionError, SessionOptions};
pub use tools::{SearchTool, ToolRegistry, ToolRunner};
