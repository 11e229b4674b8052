use crate::tools::{ToolName, ToolRegistry};

#[test]
fn test_tool_registry_declares_web_search() {
    let registry = ToolRegistry::new();

    let spec = registry.get_spec(&ToolName::WebSearch).unwrap();
    assert_eq!(spec.name, ToolName::WebSearch);
    assert!(spec.input_schema.is_object());
    assert_eq!(spec.input_schema["required"][0], "query");
    assert!(spec.description.contains("current information"));
}

#[test]
fn test_declarations_format() {
    let declarations = ToolRegistry::new().declarations();
    assert_eq!(declarations.len(), 2);

    assert_eq!(declarations[0]["type"], "code_interpreter");
    assert_eq!(declarations[1]["type"], "function");
    assert_eq!(declarations[1]["function"]["name"], "web_search");
    assert_eq!(
        declarations[1]["function"]["parameters"]["properties"]["query"]["type"],
        "string"
    );
}

#[test]
fn test_tool_name_mapping() {
    assert_eq!(ToolName::from_function_name("web_search"), Some(ToolName::WebSearch));
    assert_eq!(ToolName::from_function_name("shell.exec"), None);
    assert_eq!(ToolName::WebSearch.function_name(), "web_search");
}
