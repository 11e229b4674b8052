
// Test utilities
use crate::agent::mock::ScriptedAssistant;
use crate::agent::{AgentError, AssistantApi, AssistantSpec, RunStream, ToolOutput};
use crate::chat::RecordingChat;
use crate::events::ChannelRef;
use crate::tools::{SearchTool, ToolRunner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const BOT_USER: &str = "ai-bot";

pub fn channel() -> ChannelRef {
    ChannelRef::new("messaging", "general")
}

/// Tool runner with no search key configured
pub fn offline_tools() -> ToolRunner {
    ToolRunner::new(Arc::new(SearchTool::new(None)))
}

pub fn recording_chat() -> Arc<RecordingChat> {
    Arc::new(RecordingChat::new(BOT_USER))
}

pub fn scripted() -> Arc<ScriptedAssistant> {
    Arc::new(ScriptedAssistant::new())
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "Timed out waiting for {}", what);
}

/// Wraps a [`ScriptedAssistant`], delaying thread creation and run opening
pub struct SlowAssistant {
    pub inner: ScriptedAssistant,
    pub thread_delay: Duration,
    pub run_delay: Duration,
}

impl SlowAssistant {
    pub fn new(inner: ScriptedAssistant) -> Self {
        Self {
            inner,
            thread_delay: Duration::ZERO,
            run_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl AssistantApi for SlowAssistant {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String, AgentError> {
        self.inner.create_assistant(spec).await
    }

    async fn create_thread(&self) -> Result<String, AgentError> {
        tokio::time::sleep(self.thread_delay).await;
        self.inner.create_thread().await
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), AgentError> {
        self.inner.add_user_message(thread_id, text).await
    }

    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream, AgentError> {
        tokio::time::sleep(self.run_delay).await;
        self.inner.stream_run(thread_id, assistant_id).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream, AgentError> {
        self.inner.submit_tool_outputs(thread_id, run_id, outputs).await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), AgentError> {
        self.inner.cancel_run(thread_id, run_id).await
    }
}
