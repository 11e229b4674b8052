use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;
pub mod openai;
mod sse;

use crate::config::Config;
use crate::tools::ToolRegistry;

/// Capacity of the per-run event channel between the HTTP reader and the orchestrator.
const RUN_EVENT_BUFFER: usize = 64;

/// The hosted assistant service the relay talks to
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create the assistant persona and return its identifier
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String, AgentError>;

    /// Create an empty conversation thread and return its identifier
    async fn create_thread(&self) -> Result<String, AgentError>;

    /// Append a user message to a thread
    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), AgentError>;

    /// Start a run of `assistant_id` on `thread_id` and stream its events
    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream, AgentError>;

    /// Submit every tool output for a paused run as one batch and stream the resumed run
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream, AgentError>;

    /// Ask the provider to cancel an in-flight run
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), AgentError>;
}

/// Definition of the assistant persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<Value>,
    pub temperature: Option<f32>,
}

/// Which persona a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentPlatform {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    WritingAssistant,
}

impl AgentPlatform {
    pub fn assistant_spec(&self, model: &str, tools: &ToolRegistry) -> AssistantSpec {
        let (name, instructions) = match self {
            AgentPlatform::OpenAi => ("Scribe Assistant", include_str!("prompts/assistant.md")),
            AgentPlatform::WritingAssistant => {
                ("Scribe Writing Assistant", include_str!("prompts/writing_assistant.md"))
            }
        };
        AssistantSpec {
            name: name.to_string(),
            instructions: instructions.to_string(),
            model: model.to_string(),
            tools: tools.declarations(),
            temperature: Some(0.7),
        }
    }
}

/// A function call the run needs answered before it can continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub function_name: String,
    /// Raw JSON argument string as produced by the model
    pub arguments: String,
}

/// The answer to one [`ToolCallRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Kind of a newly created run step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    MessageCreation,
    ToolCalls,
    Other(String),
}

/// One event of a streamed assistant run, decoded from the provider's wire format
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunCreated { run_id: String },
    MessageDelta { text: String },
    RunStepCreated { kind: StepKind },
    RequiresAction { run_id: String, tool_calls: Vec<ToolCallRequest> },
    /// `text` is the provider's full message content, if it carried any
    MessageCompleted { text: Option<String> },
    RunFailed { message: Option<String> },
    /// Anything the relay does not act on
    Other(String),
}

/// Receiving half of a run's event stream
#[derive(Debug)]
pub struct RunStream {
    receiver: mpsc::Receiver<Result<RunEvent, AgentError>>,
}

/// Sending half of a run's event stream
pub type RunEventSender = mpsc::Sender<Result<RunEvent, AgentError>>;

impl RunStream {
    pub fn channel() -> (RunEventSender, RunStream) {
        let (sender, receiver) = mpsc::channel(RUN_EVENT_BUFFER);
        (sender, RunStream { receiver })
    }

    /// A stream that yields the given items and then ends
    pub fn from_items(items: Vec<Result<RunEvent, AgentError>>) -> RunStream {
        let (sender, receiver) = mpsc::channel(items.len().max(1));
        for item in items {
            // capacity covers every item
            let _ = sender.try_send(item);
        }
        RunStream { receiver }
    }

    /// Next event in provider emission order; `None` once the stream has ended
    pub async fn next(&mut self) -> Option<Result<RunEvent, AgentError>> {
        self.receiver.recv().await
    }
}

/// Errors that can occur talking to the assistant service
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Assistant API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Agent configuration error: {0}")]
    Configuration(String),

    #[error("Run event stream closed unexpectedly")]
    StreamClosed,
}

/// Factory for the assistant backends
pub struct AgentFactory;

impl AgentFactory {
    /// OpenAI Assistants backend built from the loaded configuration.
    pub fn create_openai(config: &Config) -> Result<Arc<dyn AssistantApi>, AgentError> {
        let api = openai::OpenAiAssistants::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
        )
        .map_err(|e| AgentError::Configuration(e.to_string()))?;
        Ok(Arc::new(api))
    }

    /// Offline backend that answers every run with a canned reply
    pub fn create_mock() -> Arc<dyn AssistantApi> {
        Arc::new(mock::ScriptedAssistant::echo())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_deserializes_from_snake_case() {
        let platform: AgentPlatform = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(platform, AgentPlatform::OpenAi);
        let platform: AgentPlatform = serde_json::from_str("\"writing_assistant\"").unwrap();
        assert_eq!(platform, AgentPlatform::WritingAssistant);
    }

    #[test]
    fn test_assistant_spec_declares_tools() {
        let spec = AgentPlatform::OpenAi.assistant_spec("gpt-4o", &ToolRegistry::new());
        assert_eq!(spec.model, "gpt-4o");
        assert!(spec.instructions.contains("web_search"));
        let names: Vec<&str> = spec
            .tools
            .iter()
            .map(|tool| {
                tool.pointer("/function/name")
                    .or_else(|| tool.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(names, vec!["code_interpreter", "web_search"]);
    }

    #[tokio::test]
    async fn test_run_stream_from_items_ends() {
        let mut stream = RunStream::from_items(vec![Ok(RunEvent::RunCreated {
            run_id: "run_1".to_string(),
        })]);
        assert!(matches!(stream.next().await, Some(Ok(RunEvent::RunCreated { .. }))));
        assert!(stream.next().await.is_none());
    }
}
