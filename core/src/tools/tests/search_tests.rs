use super::*;
use crate::tools::search::SEARCH_UNAVAILABLE;
use crate::tools::SearchTool;
use serde_json::{json, Value};

fn parse(output: &str) -> Value {
    serde_json::from_str(output).expect("search output must be valid JSON")
}

#[tokio::test]
async fn test_search_without_api_key() {
    // Endpoint that would fail if contacted
    let tool = SearchTool::new(None).with_endpoint(closed_endpoint().await);
    assert!(!tool.is_configured());

    let output = parse(&tool.search("weather today").await);
    assert_eq!(output, json!({ "error": SEARCH_UNAVAILABLE }));
}

#[tokio::test]
async fn test_search_blank_api_key_counts_as_missing() {
    let tool = SearchTool::new(Some("   ".to_string()));
    let output = parse(&tool.search("weather today").await);
    assert_eq!(output["error"], SEARCH_UNAVAILABLE);
}

#[tokio::test]
async fn test_search_success_returns_provider_payload() {
    let body = r#"{"answer":"Sunny, 21C","results":[{"title":"Forecast","url":"https://example.com"}]}"#;
    let (endpoint, request) = serve_once("200 OK", body).await;
    let tool = SearchTool::new(Some("tvly-test".to_string())).with_endpoint(endpoint);

    let output = parse(&tool.search("weather today").await);
    assert_eq!(output["answer"], "Sunny, 21C");
    assert_eq!(output["results"][0]["title"], "Forecast");

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /search"));
    assert!(request.to_lowercase().contains("authorization: bearer tvly-test"));

    let request_body = parse(request.split("\r\n\r\n").nth(1).unwrap());
    assert_eq!(
        request_body,
        json!({
            "query": "weather today",
            "search_depth": "advanced",
            "max_results": 5,
            "include_answer": true,
            "include_raw_content": false
        })
    );
}

#[tokio::test]
async fn test_search_non_success_status() {
    let (endpoint, _request) = serve_once("429 Too Many Requests", r#"{"detail":"slow down"}"#).await;
    let tool = SearchTool::new(Some("tvly-test".to_string())).with_endpoint(endpoint);

    let output = parse(&tool.search("weather today").await);
    assert_eq!(output["error"], "Search failed with status: 429");
    assert_eq!(output["details"], r#"{"detail":"slow down"}"#);
}

#[tokio::test]
async fn test_search_network_exception() {
    let tool = SearchTool::new(Some("tvly-test".to_string())).with_endpoint(closed_endpoint().await);

    let output = parse(&tool.search("weather today").await);
    let error = output["error"].as_str().unwrap();
    assert!(error.starts_with("An exception occurred during web search"));
}

#[tokio::test]
async fn test_search_invalid_json_body() {
    let (endpoint, _request) = serve_once("200 OK", "definitely not json").await;
    let tool = SearchTool::new(Some("tvly-test".to_string())).with_endpoint(endpoint);

    let output = parse(&tool.search("weather today").await);
    assert!(output.get("error").is_some());
}
