use crate::agent::openai::DEFAULT_OPENAI_BASE_URL;
use crate::chat::stream_chat::DEFAULT_STREAM_BASE_URL;
use crate::tools::search::DEFAULT_SEARCH_URL;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BOT_USER_ID: &str = "ai-bot";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_AGENT_IDLE_SECS: u64 = 8 * 60 * 60;

/// Runtime configuration, read from the process environment
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Missing key leaves web search degraded, not the process
    pub tavily_api_key: Option<String>,
    pub search_url: String,
    pub stream_api_key: String,
    pub stream_api_secret: String,
    pub stream_base_url: String,
    pub bot_user_id: String,
    pub port: u16,
    pub agent_idle_timeout: Duration,
    /// `None` means a run may stay silent indefinitely
    pub run_idle_timeout: Option<Duration>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Config {
    /// Load `.env` (if present) and read the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        Ok(Self {
            openai_api_key: require("OPENAI_API_KEY")?,
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            tavily_api_key: get("TAVILY_API_KEY"),
            search_url: get("TAVILY_SEARCH_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            stream_api_key: require("STREAM_API_KEY")?,
            stream_api_secret: require("STREAM_API_SECRET")?,
            stream_base_url: get("STREAM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_STREAM_BASE_URL.to_string()),
            bot_user_id: get("AI_BOT_USER_ID").unwrap_or_else(|| DEFAULT_BOT_USER_ID.to_string()),
            port: match get("PORT") {
                Some(port) => parse_number("PORT", &port)?,
                None => DEFAULT_PORT,
            },
            agent_idle_timeout: Duration::from_secs(match get("AGENT_IDLE_TIMEOUT_SECS") {
                Some(secs) => parse_number("AGENT_IDLE_TIMEOUT_SECS", &secs)?,
                None => DEFAULT_AGENT_IDLE_SECS,
            }),
            run_idle_timeout: match get("RUN_IDLE_TIMEOUT_SECS") {
                Some(secs) => Some(Duration::from_secs(parse_number(
                    "RUN_IDLE_TIMEOUT_SECS",
                    &secs,
                )?)),
                None => None,
            },
        })
    }

    /// Configuration for offline development against the scripted assistant
    pub fn for_mock() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let vars: HashMap<&str, String> = HashMap::from([
            ("OPENAI_API_KEY", "mock".to_string()),
            ("STREAM_API_KEY", "mock".to_string()),
            ("STREAM_API_SECRET", "mock".to_string()),
        ]);
        Self::from_lookup(|name| vars.get(name).cloned().or_else(|| std::env::var(name).ok()))
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
