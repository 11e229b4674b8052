use crate::agent::{ToolCallRequest, ToolOutput};
use crate::tools::search::SearchTool;
use crate::tools::types::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Answers the tool calls of a paused run
#[derive(Clone)]
pub struct ToolRunner {
    search: Arc<SearchTool>,
}

impl ToolRunner {
    pub fn new(search: Arc<SearchTool>) -> Self {
        Self { search }
    }

    /// Produce exactly one output per call, in request order
    pub async fn run_all(&self, calls: &[ToolCallRequest]) -> Vec<ToolOutput> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            outputs.push(self.run(call).await);
        }
        outputs
    }

    /// Execute one call. Failures become an `{"error": ...}` output for that call.
    pub async fn run(&self, call: &ToolCallRequest) -> ToolOutput {
        let start = Instant::now();

        let output = match ToolName::from_function_name(&call.function_name) {
            Some(ToolName::WebSearch) => match serde_json::from_str::<WebSearchArgs>(&call.arguments) {
                Ok(args) => self.search.search(&args.query).await,
                Err(e) => {
                    warn!(tool_call_id = %call.id, error = %e, "invalid web_search arguments");
                    json!({ "error": format!("Invalid arguments for web_search: {}", e) }).to_string()
                }
            },
            None => {
                warn!(tool_call_id = %call.id, function = %call.function_name, "unknown tool requested");
                json!({ "error": format!("Unknown tool: {}", call.function_name) }).to_string()
            }
        };

        debug!(
            tool_call_id = %call.id,
            duration_ms = start.elapsed().as_millis() as u64,
            "tool call answered"
        );

        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }
}
