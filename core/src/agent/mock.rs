use super::{
    AgentError, AssistantApi, AssistantSpec, RunEvent, RunEventSender, RunStream, StepKind,
    ToolCallRequest, ToolOutput,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// A call made against the [`ScriptedAssistant`]
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantCall {
    CreateAssistant { name: String },
    CreateThread,
    AddUserMessage { thread_id: String, text: String },
    StreamRun { thread_id: String, assistant_id: String },
    SubmitToolOutputs { run_id: String, outputs: Vec<ToolOutput> },
    CancelRun { run_id: String },
}

/// In-process assistant that replays scripted runs.
///
/// Every `stream_run` / `submit_tool_outputs` call takes the next queued
/// stream. With an empty queue it either echoes the last user message (see
/// [`ScriptedAssistant::echo`]) or fails.
pub struct ScriptedAssistant {
    streams: Mutex<VecDeque<RunStream>>,
    calls: Mutex<Vec<AssistantCall>>,
    last_user_message: Mutex<String>,
    echo: bool,
    fail_cancel: bool,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            last_user_message: Mutex::new(String::new()),
            echo: false,
            fail_cancel: false,
        }
    }

    /// Answers every run with a canned reply. Messages starting with
    /// `search ` go through a `web_search` round-trip first.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    /// Make `cancel_run` return an error
    pub fn with_failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    /// Queue a stream that yields `events` and then ends
    pub fn script_run(&self, events: Vec<RunEvent>) {
        self.push_stream(RunStream::from_items(events.into_iter().map(Ok).collect()));
    }

    /// Queue a stream that yields the given items, errors included
    pub fn script_items(&self, items: Vec<Result<RunEvent, AgentError>>) {
        self.push_stream(RunStream::from_items(items));
    }

    /// Queue a stream the caller feeds by hand; it stays open until the sender is dropped
    pub fn live_run(&self) -> RunEventSender {
        let (sender, stream) = RunStream::channel();
        self.push_stream(stream);
        sender
    }

    pub fn calls(&self) -> Vec<AssistantCall> {
        lock(&self.calls).clone()
    }

    fn push_stream(&self, stream: RunStream) {
        lock(&self.streams).push_back(stream);
    }

    fn record(&self, call: AssistantCall) {
        lock(&self.calls).push(call);
    }

    fn next_stream(&self, outputs: Option<&[ToolOutput]>) -> Result<RunStream, AgentError> {
        if let Some(stream) = lock(&self.streams).pop_front() {
            return Ok(stream);
        }
        if !self.echo {
            return Err(AgentError::Configuration("no scripted run left".to_string()));
        }
        let message = lock(&self.last_user_message).clone();
        Ok(RunStream::from_items(
            echo_events(&message, outputs).into_iter().map(Ok).collect(),
        ))
    }
}

impl Default for ScriptedAssistant {
    fn default() -> Self {
        Self::new()
    }
}

fn echo_events(message: &str, outputs: Option<&[ToolOutput]>) -> Vec<RunEvent> {
    let run_id = format!("run_{}", Uuid::new_v4().simple());
    let mut events = vec![RunEvent::RunCreated {
        run_id: run_id.clone(),
    }];

    if outputs.is_none() {
        if let Some(query) = message.strip_prefix("search ") {
            events.push(RunEvent::RunStepCreated {
                kind: StepKind::ToolCalls,
            });
            events.push(RunEvent::RequiresAction {
                run_id,
                tool_calls: vec![ToolCallRequest {
                    id: format!("call_{}", Uuid::new_v4().simple()),
                    function_name: "web_search".to_string(),
                    arguments: json!({ "query": query }).to_string(),
                }],
            });
            return events;
        }
    }

    let reply = match outputs {
        Some(outputs) => format!(
            "Here is what the search returned: {}",
            outputs
                .iter()
                .map(|o| o.output.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        ),
        None => format!("I'm going to help you with: {}", message),
    };

    events.push(RunEvent::RunStepCreated {
        kind: StepKind::MessageCreation,
    });
    for word in reply.split_inclusive(' ') {
        events.push(RunEvent::MessageDelta {
            text: word.to_string(),
        });
    }
    events.push(RunEvent::MessageCompleted { text: Some(reply) });
    events
}

#[async_trait]
impl AssistantApi for ScriptedAssistant {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String, AgentError> {
        self.record(AssistantCall::CreateAssistant {
            name: spec.name.clone(),
        });
        Ok(format!("asst_{}", Uuid::new_v4().simple()))
    }

    async fn create_thread(&self) -> Result<String, AgentError> {
        self.record(AssistantCall::CreateThread);
        Ok(format!("thread_{}", Uuid::new_v4().simple()))
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), AgentError> {
        self.record(AssistantCall::AddUserMessage {
            thread_id: thread_id.to_string(),
            text: text.to_string(),
        });
        *lock(&self.last_user_message) = text.to_string();
        Ok(())
    }

    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream, AgentError> {
        self.record(AssistantCall::StreamRun {
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
        });
        self.next_stream(None)
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream, AgentError> {
        self.record(AssistantCall::SubmitToolOutputs {
            run_id: run_id.to_string(),
            outputs: outputs.clone(),
        });
        self.next_stream(Some(&outputs))
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<(), AgentError> {
        self.record(AssistantCall::CancelRun {
            run_id: run_id.to_string(),
        });
        if self.fail_cancel {
            return Err(AgentError::Api {
                status: 400,
                body: "Cannot cancel run with status 'completed'".to_string(),
            });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut stream: RunStream) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_echo_reply() {
        let assistant = ScriptedAssistant::echo();
        assistant.add_user_message("thread_1", "Hello, world!").await.unwrap();
        let events = drain(assistant.stream_run("thread_1", "asst_1").await.unwrap()).await;

        match events.last() {
            Some(RunEvent::MessageCompleted { text: Some(text) }) => {
                assert_eq!(text, "I'm going to help you with: Hello, world!")
            }
            other => panic!("Expected MessageCompleted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_echo_search_requires_action() {
        let assistant = ScriptedAssistant::echo();
        assistant.add_user_message("thread_1", "search rust news").await.unwrap();
        let events = drain(assistant.stream_run("thread_1", "asst_1").await.unwrap()).await;

        match events.last() {
            Some(RunEvent::RequiresAction { tool_calls, .. }) => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].function_name, "web_search");
                assert_eq!(tool_calls[0].arguments, r#"{"query":"rust news"}"#);
            }
            other => panic!("Expected RequiresAction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_runs_are_consumed_in_order() {
        let assistant = ScriptedAssistant::new();
        assistant.script_run(vec![RunEvent::RunCreated {
            run_id: "run_1".to_string(),
        }]);

        let events = drain(assistant.stream_run("t", "a").await.unwrap()).await;
        assert_eq!(
            events,
            vec![RunEvent::RunCreated {
                run_id: "run_1".to_string()
            }]
        );
        assert!(matches!(
            assistant.stream_run("t", "a").await,
            Err(AgentError::Configuration(_))
        ));
        assert_eq!(assistant.calls().len(), 2);
    }
}
