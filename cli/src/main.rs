mod server;

use anyhow::{Context, Result};
use scribe_core::agent::AgentFactory;
use scribe_core::chat::stream_chat::StreamChatClient;
use scribe_core::chat::RecordingChat;
use scribe_core::{AgentRegistry, ChatClient, ChatFactory, Config, SearchTool, ToolRunner};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // --mock runs against the scripted assistant and a logging chat client
    let mock = std::env::args().skip(1).any(|arg| arg == "--mock");
    let config = if mock {
        Config::for_mock()
    } else {
        Config::from_env()
    }
    .context("Invalid configuration")?;

    let search = Arc::new(SearchTool::from_config(&config));
    if !search.is_configured() {
        warn!("TAVILY_API_KEY not set, web search will report itself unavailable");
    }
    let tools = ToolRunner::new(search);

    let (api, chat_factory) = if mock {
        let bot_user_id = config.bot_user_id.clone();
        let factory: ChatFactory = Arc::new(move || {
            let chat: Arc<dyn ChatClient> = Arc::new(RecordingChat::new(bot_user_id.clone()));
            Ok(chat)
        });
        (AgentFactory::create_mock(), factory)
    } else {
        let api = AgentFactory::create_openai(&config)?;
        let (key, secret, base_url, bot_user_id) = (
            config.stream_api_key.clone(),
            config.stream_api_secret.clone(),
            config.stream_base_url.clone(),
            config.bot_user_id.clone(),
        );
        let factory: ChatFactory = Arc::new(move || {
            let chat: Arc<dyn ChatClient> = Arc::new(StreamChatClient::new(
                key.clone(),
                &secret,
                base_url.clone(),
                bot_user_id.clone(),
            )?);
            Ok(chat)
        });
        (api, factory)
    };

    let registry = Arc::new(AgentRegistry::new(&config, api, chat_factory, tools));
    let sweeper = server::spawn_idle_sweeper(Arc::clone(&registry), config.agent_idle_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = server::router(server::AppState {
        registry: Arc::clone(&registry),
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, mock, "AI agent relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sweeper.abort();
    registry.shutdown().await;
    info!("AI agent relay shut down");
    Ok(())
}
