use super::sse::{decode_run_event, Decoded, SseDecoder, SseFrame};
use super::{AgentError, AssistantApi, AssistantSpec, RunEventSender, RunStream, ToolOutput};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenAI Assistants (v2) backend with streamed runs
pub struct OpenAiAssistants {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAssistants {
    pub fn new(api_key: String, base_url: String) -> anyhow::Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("OpenAI API key is required");
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .header("Content-Type", "application/json")
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AgentError> {
        let resp = self
            .post(path)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("request error: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Api { status, body });
        }

        resp.json::<T>()
            .await
            .map_err(|e| AgentError::Decode(format!("{}: {}", path, e)))
    }

    /// POST with `stream: true` and hand the SSE body to a reader task
    async fn open_stream(&self, path: &str, mut body: Value) -> Result<RunStream, AgentError> {
        body["stream"] = json!(true);
        let resp = self
            .post(path)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Network(format!("request error: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Api { status, body });
        }

        let (sender, stream) = RunStream::channel();
        tokio::spawn(read_event_stream(resp, sender));
        Ok(stream)
    }
}

async fn read_event_stream(mut resp: reqwest::Response, sender: RunEventSender) {
    let mut decoder = SseDecoder::new();
    loop {
        match resp.chunk().await {
            Ok(Some(bytes)) => {
                for frame in decoder.push(&bytes) {
                    if !forward(&sender, &frame).await {
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Some(frame) = decoder.finish() {
                    forward(&sender, &frame).await;
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "assistant event stream interrupted");
                let _ = sender
                    .send(Err(AgentError::Network(format!("stream error: {}", e))))
                    .await;
                return;
            }
        }
    }
}

/// Returns false once the reader should stop
async fn forward(sender: &RunEventSender, frame: &SseFrame) -> bool {
    match decode_run_event(frame) {
        Ok(Decoded::Event(event)) => {
            debug!(event = ?frame.event, "assistant stream event");
            sender.send(Ok(event)).await.is_ok()
        }
        Ok(Decoded::Done) => false,
        Err(e) => {
            let _ = sender.send(Err(e)).await;
            false
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[async_trait]
impl AssistantApi for OpenAiAssistants {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String, AgentError> {
        let mut body = json!({
            "name": spec.name,
            "instructions": spec.instructions,
            "model": spec.model,
            "tools": spec.tools,
        });
        if let Some(temperature) = spec.temperature {
            body["temperature"] = json!(temperature);
        }
        let created: IdObject = self.post_json("/assistants", &body).await?;
        Ok(created.id)
    }

    async fn create_thread(&self) -> Result<String, AgentError> {
        let created: IdObject = self.post_json("/threads", &json!({})).await?;
        Ok(created.id)
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), AgentError> {
        let _: IdObject = self
            .post_json(
                &format!("/threads/{}/messages", thread_id),
                &json!({ "role": "user", "content": text }),
            )
            .await?;
        Ok(())
    }

    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream, AgentError> {
        self.open_stream(
            &format!("/threads/{}/runs", thread_id),
            json!({ "assistant_id": assistant_id }),
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream, AgentError> {
        self.open_stream(
            &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            json!({ "tool_outputs": outputs }),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), AgentError> {
        let _: IdObject = self
            .post_json(&format!("/threads/{}/runs/{}/cancel", thread_id, run_id), &json!({}))
            .await?;
        Ok(())
    }
}
