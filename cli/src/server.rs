//! HTTP surface: agent lifecycle endpoints and the chat webhook.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use scribe_core::{AgentPlatform, AgentRegistry, ChannelRef, ChatEvent, Config, StartOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub channel_id: Option<String>,
    pub channel_type: Option<String>,
    #[serde(default)]
    pub platform: AgentPlatform,
}

impl ChannelRequest {
    /// Accepts either a bare channel id or a full `type:id` cid
    fn channel(&self) -> Option<ChannelRef> {
        let id = self.channel_id.as_deref()?.trim();
        if id.contains(':') {
            return ChannelRef::from_cid(id);
        }
        if id.is_empty() {
            return None;
        }
        let channel_type = self.channel_type.as_deref().unwrap_or("messaging");
        Some(ChannelRef::new(channel_type, id))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/start-ai-agent", post(start_agent))
        .route("/stop-ai-agent", post(stop_agent))
        .route("/agent-status", get(agent_status))
        .route("/webhook", post(webhook))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Dispose sessions that have been idle longer than `max_idle`
pub fn spawn_idle_sweeper(registry: Arc<AgentRegistry>, max_idle: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = registry.evict_idle(max_idle).await;
            if !evicted.is_empty() {
                info!(count = evicted.len(), "idle agents disposed");
            }
        }
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "AI agent relay is running",
        "apiKey": state.config.stream_api_key,
        "activeAgents": state.registry.count().await,
    }))
}

async fn start_agent(State(state): State<AppState>, Json(request): Json<ChannelRequest>) -> Response {
    let Some(channel) = request.channel() else {
        return missing_channel();
    };

    match state.registry.start(channel.clone(), request.platform).await {
        Ok(outcome) => {
            if outcome == StartOutcome::AlreadyRunning {
                debug!(cid = %channel.cid(), "agent already running");
            }
            Json(json!({ "message": "AI Agent started", "data": [] })).into_response()
        }
        Err(e) => {
            error!(cid = %channel.cid(), error = %e, "failed to start AI agent");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to start AI Agent", "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn stop_agent(State(state): State<AppState>, Json(request): Json<ChannelRequest>) -> Response {
    let Some(channel) = request.channel() else {
        return missing_channel();
    };

    state.registry.stop(&channel).await;
    Json(json!({ "message": "AI Agent stopped", "data": [] })).into_response()
}

async fn agent_status(State(state): State<AppState>, Query(request): Query<ChannelRequest>) -> Response {
    let Some(channel) = request.channel() else {
        return missing_channel();
    };

    let status = if state.registry.is_running(&channel).await {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({ "status": status })).into_response()
}

async fn webhook(State(state): State<AppState>, Json(payload): Json<Value>) -> Json<Value> {
    match ChatEvent::from_webhook(&payload) {
        Some(event) => {
            let delivered = state.registry.publish(event);
            Json(json!({ "received": true, "delivered": delivered }))
        }
        None => {
            debug!(kind = payload["type"].as_str().unwrap_or("unknown"), "ignoring webhook event");
            Json(json!({ "received": false }))
        }
    }
}

fn missing_channel() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Missing required fields: channel_id" })),
    )
        .into_response()
}
