use crate::config::Config;
use crate::tools::types::SearchRequest;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

pub const SEARCH_UNAVAILABLE: &str = "Web Search is not available, API key not configured";

/// Web search through the Tavily API.
///
/// `search` never fails: every problem comes back as a JSON object with an
/// `error` key so the assistant can reason about it. One attempt per call.
pub struct SearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl SearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            endpoint: DEFAULT_SEARCH_URL.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tavily_api_key.clone()).with_endpoint(config.search_url.clone())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Run one search and return the provider payload (or an error object) as a JSON string
    pub async fn search(&self, query: &str) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            return json!({ "error": SEARCH_UNAVAILABLE }).to_string();
        };

        info!(query, "performing web search");
        let resp = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(&SearchRequest::advanced(query))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return exception(query, &e),
        };

        let status = resp.status();
        if !status.is_success() {
            let details = resp.text().await.unwrap_or_default();
            warn!(query, status = status.as_u16(), %details, "web search failed");
            return json!({
                "error": format!("Search failed with status: {}", status.as_u16()),
                "details": details,
            })
            .to_string();
        }

        match resp.json::<Value>().await {
            Ok(data) => {
                info!(query, "web search succeeded");
                data.to_string()
            }
            Err(e) => exception(query, &e),
        }
    }
}

fn exception(query: &str, e: &reqwest::Error) -> String {
    error!(query, error = %e, "exception during web search");
    json!({ "error": format!("An exception occurred during web search: {}", e) }).to_string()
}
