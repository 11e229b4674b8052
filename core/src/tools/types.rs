use serde::{Deserialize, Serialize};

/// Function tools the assistant may call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToolName {
    WebSearch,
}

impl ToolName {
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            "web_search" => Some(ToolName::WebSearch),
            _ => None,
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            ToolName::WebSearch => "web_search",
        }
    }
}

/// Declaration of a function tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: String,
    pub input_schema: serde_json::Value, // JSON Schema
}

// web_search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchArgs {
    pub query: String,
}

/// Body of a search-provider request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub search_depth: String,
    pub max_results: u32,
    pub include_answer: bool,
    pub include_raw_content: bool,
}

impl SearchRequest {
    pub fn advanced(query: &str) -> Self {
        Self {
            query: query.to_string(),
            search_depth: "advanced".to_string(),
            max_results: 5,
            include_answer: true,
            include_raw_content: false,
        }
    }
}
