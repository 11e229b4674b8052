use super::{ChatClient, ChatError, IndicatorEvent};
use crate::events::ChannelRef;
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_STREAM_BASE_URL: &str = "https://chat.stream-io-api.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct ServerClaims {
    server: bool,
}

/// Server-side REST client for Stream Chat acting as the bot user
pub struct StreamChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    token: String,
    bot_user_id: String,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    id: String,
}

impl StreamChatClient {
    pub fn new(
        api_key: String,
        api_secret: &str,
        base_url: String,
        bot_user_id: String,
    ) -> Result<Self, ChatError> {
        let token = server_token(api_secret)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            token,
            bot_user_id,
            closed: AtomicBool::new(false),
        })
    }

    async fn call(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<Value, ChatError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::Network("client disconnected".to_string()));
        }
        debug!(%method, path, "stream chat request");

        let resp = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .query(&[("api_key", &self.api_key)])
            .header("Authorization", &self.token)
            .header("stream-auth-type", "jwt")
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Network(format!("request error: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ChatError::Network(format!("decode error: {}", e)))
    }
}

/// HS256 token carrying `{"server": true}`, signed with the API secret
pub fn server_token(api_secret: &str) -> Result<String, ChatError> {
    encode(
        &Header::default(),
        &ServerClaims { server: true },
        &EncodingKey::from_secret(api_secret.as_bytes()),
    )
    .map_err(|e| ChatError::Auth(format!("Failed to encode server token: {}", e)))
}

#[async_trait]
impl ChatClient for StreamChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn join_channel(&self, channel: &ChannelRef) -> Result<(), ChatError> {
        self.call(
            reqwest::Method::POST,
            "/users",
            &json!({
                "users": {
                    self.bot_user_id.clone(): {
                        "id": self.bot_user_id,
                        "name": "AI Bot",
                        "role": "admin",
                    }
                }
            }),
        )
        .await?;
        self.call(
            reqwest::Method::POST,
            &format!("/channels/{}/{}", channel.channel_type, channel.channel_id),
            &json!({ "add_members": [self.bot_user_id] }),
        )
        .await?;
        info!(cid = %channel.cid(), user = %self.bot_user_id, "bot joined channel");
        Ok(())
    }

    async fn create_placeholder(&self, channel: &ChannelRef) -> Result<String, ChatError> {
        let resp = self
            .call(
                reqwest::Method::POST,
                &format!("/channels/{}/{}/message", channel.channel_type, channel.channel_id),
                &json!({
                    "message": {
                        "text": "",
                        "ai_generated": true,
                        "user_id": self.bot_user_id,
                    }
                }),
            )
            .await?;
        let envelope: MessageEnvelope = serde_json::from_value(resp)
            .map_err(|e| ChatError::Network(format!("decode error: {}", e)))?;
        Ok(envelope.message.id)
    }

    async fn update_text(&self, message_id: &str, text: &str) -> Result<(), ChatError> {
        self.call(
            reqwest::Method::PUT,
            &format!("/messages/{}", message_id),
            &json!({
                "set": { "text": text },
                "user_id": self.bot_user_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn send_indicator(&self, channel: &ChannelRef, event: IndicatorEvent) -> Result<(), ChatError> {
        let mut payload = event.to_payload(channel);
        payload["user_id"] = json!(self.bot_user_id);
        self.call(
            reqwest::Method::POST,
            &format!("/channels/{}/{}/event", channel.channel_type, channel.channel_id),
            &json!({ "event": payload }),
        )
        .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(user = %self.bot_user_id, "chat client disconnected");
        }
        Ok(())
    }
}
