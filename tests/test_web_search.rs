//! Serper web search against a wiremock server

use research_crew::config::SearchSection;
use research_crew::tools::{SearchTool, SerperSearch};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn search_for(server: &MockServer, max_results: usize) -> SerperSearch {
    let section = SearchSection {
        max_results,
        base_url: Some(server.uri()),
        ..Default::default()
    };
    SerperSearch::from_config(&section, "serper-key".to_string()).unwrap()
}

#[tokio::test]
async fn test_search_renders_numbered_results() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("X-API-KEY", "serper-key"))
        .and(body_partial_json(json!({ "q": "solid state batteries", "num": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organic": [
                {
                    "title": "Solid-state battery",
                    "link": "https://example.org/ssb",
                    "snippet": "A battery with a solid electrolyte."
                },
                {
                    "title": "Progress in 2025",
                    "link": "https://example.org/progress",
                    "snippet": "Pilot lines are scaling up."
                },
                {
                    "title": "Cut by max_results",
                    "link": "https://example.org/extra"
                }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let results = search_for(&mock_server, 2)
        .search("solid state batteries")
        .await
        .unwrap();

    assert_eq!(
        results,
        "1. Solid-state battery\n   URL: https://example.org/ssb\n   A battery with a solid electrolyte.\n\n\
         2. Progress in 2025\n   URL: https://example.org/progress\n   Pilot lines are scaling up."
    );
}

#[tokio::test]
async fn test_search_without_hits_says_so() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "organic": [] })))
        .mount(&mock_server)
        .await;

    let results = search_for(&mock_server, 10).search("zzqx").await.unwrap();
    assert_eq!(results, "No search results found for: zzqx");
}

#[tokio::test]
async fn test_search_api_error_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(403).set_body_string("invalid key"))
        .mount(&mock_server)
        .await;

    let error = search_for(&mock_server, 10)
        .search("anything")
        .await
        .unwrap_err();
    assert!(error.contains("403"));
    assert!(error.contains("invalid key"));
}
