use crate::events::ChannelRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub mod stream_chat;

/// Activity shown next to a message while the assistant works on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

impl AiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiState::Generating => "AI_STATE_GENERATING",
            AiState::ExternalSources => "AI_STATE_EXTERNAL_SOURCES",
            AiState::Error => "AI_STATE_ERROR",
        }
    }
}

/// Out-of-band indicator event for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndicatorEvent {
    Update { state: AiState, message_id: String },
    Clear { message_id: String },
}

impl IndicatorEvent {
    pub fn message_id(&self) -> &str {
        match self {
            IndicatorEvent::Update { message_id, .. } | IndicatorEvent::Clear { message_id } => {
                message_id
            }
        }
    }

    /// Wire body of the channel event
    pub fn to_payload(&self, channel: &ChannelRef) -> Value {
        match self {
            IndicatorEvent::Update { state, message_id } => json!({
                "type": "ai_indicator.update",
                "ai_state": state.as_str(),
                "cid": channel.cid(),
                "message_id": message_id,
            }),
            IndicatorEvent::Clear { message_id } => json!({
                "type": "ai_indicator.clear",
                "cid": channel.cid(),
                "message_id": message_id,
            }),
        }
    }
}

/// The chat platform as seen by the relay
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// User id the relay posts as
    fn bot_user_id(&self) -> &str;

    /// Make sure the bot user exists and is a member of the channel
    async fn join_channel(&self, _channel: &ChannelRef) -> Result<(), ChatError> {
        Ok(())
    }

    /// Post an empty, AI-flagged message and return its id
    async fn create_placeholder(&self, channel: &ChannelRef) -> Result<String, ChatError>;

    /// Replace the text of a message
    async fn update_text(&self, message_id: &str, text: &str) -> Result<(), ChatError>;

    async fn send_indicator(&self, channel: &ChannelRef, event: IndicatorEvent) -> Result<(), ChatError>;

    /// Release the connection held for the bot user
    async fn disconnect(&self) -> Result<(), ChatError>;
}

#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("Chat network error: {0}")]
    Network(String),

    #[error("Chat API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Chat auth error: {0}")]
    Auth(String),
}

/// Something the [`RecordingChat`] was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    CreatePlaceholder { cid: String, message_id: String },
    UpdateText { message_id: String, text: String },
    Indicator { cid: String, event: IndicatorEvent },
    Disconnect,
}

/// Chat client that records every call and logs it; used offline and in tests
pub struct RecordingChat {
    bot_user_id: String,
    calls: Mutex<Vec<ChatCall>>,
    fail_placeholder: bool,
}

impl RecordingChat {
    pub fn new(bot_user_id: impl Into<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            calls: Mutex::new(Vec::new()),
            fail_placeholder: false,
        }
    }

    pub fn with_failing_placeholder(mut self) -> Self {
        self.fail_placeholder = true;
        self
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        lock(&self.calls).clone()
    }

    /// Text updates for one message, in order
    pub fn text_updates(&self, message_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChatCall::UpdateText { message_id: id, text } if id == message_id => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Indicator events for one message, in order
    pub fn indicators(&self, message_id: &str) -> Vec<IndicatorEvent> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChatCall::Indicator { event, .. } => {
                    (event.message_id() == message_id).then_some(event)
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ChatCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn create_placeholder(&self, channel: &ChannelRef) -> Result<String, ChatError> {
        if self.fail_placeholder {
            return Err(ChatError::Api {
                status: 500,
                body: "placeholder rejected".to_string(),
            });
        }
        let message_id = Uuid::new_v4().to_string();
        info!(cid = %channel.cid(), %message_id, "chat: placeholder created");
        self.record(ChatCall::CreatePlaceholder {
            cid: channel.cid(),
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    async fn update_text(&self, message_id: &str, text: &str) -> Result<(), ChatError> {
        info!(%message_id, text, "chat: message text");
        self.record(ChatCall::UpdateText {
            message_id: message_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_indicator(&self, channel: &ChannelRef, event: IndicatorEvent) -> Result<(), ChatError> {
        info!(cid = %channel.cid(), ?event, "chat: indicator");
        self.record(ChatCall::Indicator {
            cid: channel.cid(),
            event,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        self.record(ChatCall::Disconnect);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
