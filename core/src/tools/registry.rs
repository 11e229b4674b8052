use crate::tools::types::{ToolName, ToolSpec};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Registry of the tools declared to the assistant persona
pub struct ToolRegistry {
    specs: HashMap<ToolName, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            specs: HashMap::new(),
        };

        registry.register_builtin_tools();
        registry
    }

    /// Register all built-in tools
    fn register_builtin_tools(&mut self) {
        // web_search
        self.specs.insert(ToolName::WebSearch, ToolSpec {
            name: ToolName::WebSearch,
            description: "Search the web for current information, news, facts, or any topic. \
                Use this for time-sensitive questions or anything that may have changed recently. \
                Returns JSON with an `answer` and a list of `results`."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query, phrased as you would type it into a search engine"
                    }
                },
                "required": ["query"]
            }),
        });
    }

    /// Look up the declaration of a tool
    pub fn get_spec(&self, name: &ToolName) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    /// Tool declarations in the assistants API format: the built-in code
    /// interpreter first, then every function tool.
    pub fn declarations(&self) -> Vec<Value> {
        let mut specs: Vec<&ToolSpec> = self.specs.values().collect();
        specs.sort_by_key(|spec| spec.name.function_name());

        let mut tools = vec![json!({ "type": "code_interpreter" })];
        tools.extend(specs.into_iter().map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name.function_name(),
                    "description": spec.description,
                    "parameters": spec.input_schema,
                }
            })
        }));
        tools
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
