//! Web search backed by the Serper API

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::SearchSection;
use crate::error::{CrewError, CrewResult};

const SERPER_URL: &str = "https://google.serper.dev/search";

/// Source of search results for the web search stage
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Search for `query` and return results rendered as text
    async fn search(&self, query: &str) -> Result<String, String>;
}

/// One organic search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Serper-backed search tool
pub struct SerperSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl SerperSearch {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> CrewResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrewError::collaborator_unavailable("web_search", e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: SERPER_URL.to_string(),
            max_results,
        })
    }

    /// Build from the `[search]` section, resolving the API key from the environment
    pub fn from_config(section: &SearchSection, api_key: String) -> CrewResult<Self> {
        let mut search = Self::new(api_key, section.max_results)?;
        if let Some(base_url) = &section.base_url {
            search.endpoint = format!("{}/search", base_url.trim_end_matches('/'));
        }
        Ok(search)
    }

    /// Build search payload (pure function)
    fn build_search_payload(query: &str, max_results: usize) -> Value {
        json!({
            "q": query,
            "num": max_results,
            "gl": "us",
            "hl": "en"
        })
    }

    /// Parse search response (pure function)
    fn parse_search_response(search_result: &Value, max_results: usize) -> Vec<SearchHit> {
        search_result
            .get("organic")
            .and_then(|o| o.as_array())
            .map(|organic| {
                organic
                    .iter()
                    .filter_map(|result| {
                        let title = result.get("title").and_then(|t| t.as_str())?;
                        let link = result.get("link").and_then(|l| l.as_str())?;
                        let snippet = result.get("snippet").and_then(|s| s.as_str()).unwrap_or("");
                        Some(SearchHit {
                            title: title.to_string(),
                            url: link.to_string(),
                            snippet: snippet.to_string(),
                        })
                    })
                    .take(max_results)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Render hits as numbered entries (pure function)
    fn format_search_results(query: &str, hits: &[SearchHit]) -> String {
        if hits.is_empty() {
            return format!("No search results found for: {query}");
        }

        hits.iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "{}. {}\n   URL: {}\n   {}",
                    i + 1,
                    hit.title,
                    hit.url,
                    hit.snippet
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl SearchTool for SerperSearch {
    async fn search(&self, query: &str) -> Result<String, String> {
        let payload = Self::build_search_payload(query, self.max_results);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!(
                "Serper API error ({}): {}",
                status.as_u16(),
                error_text
            ));
        }

        let search_result: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {e}"))?;

        let hits = Self::parse_search_response(&search_result, self.max_results);
        debug!(query = query, hits = hits.len(), "Web search completed");
        Ok(Self::format_search_results(query, &hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_search_payload() {
        let payload = SerperSearch::build_search_payload("test query", 5);

        assert_eq!(payload["q"], "test query");
        assert_eq!(payload["num"], 5);
        assert_eq!(payload["gl"], "us");
        assert_eq!(payload["hl"], "en");
    }

    #[test]
    fn test_parse_search_response_empty() {
        assert!(SerperSearch::parse_search_response(&json!({}), 5).is_empty());
    }

    #[test]
    fn test_parse_search_response_skips_incomplete_hits() {
        let response = json!({
            "organic": [
                {"title": "No link"},
                {"title": "Solar", "link": "https://example.com/solar", "snippet": "Cheap"},
                {"title": "Wind", "link": "https://example.com/wind"}
            ]
        });

        let hits = SerperSearch::parse_search_response(&response, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Solar");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn test_parse_search_response_respects_max_results() {
        let organic: Vec<Value> = (0..8)
            .map(|i| json!({"title": format!("t{i}"), "link": format!("https://e.com/{i}")}))
            .collect();
        let hits = SerperSearch::parse_search_response(&json!({ "organic": organic }), 3);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_format_search_results() {
        let hits = vec![SearchHit {
            title: "Solar".to_string(),
            url: "https://example.com".to_string(),
            snippet: "Cheap power".to_string(),
        }];

        let text = SerperSearch::format_search_results("energy", &hits);
        assert_eq!(text, "1. Solar\n   URL: https://example.com\n   Cheap power");
        assert_eq!(
            SerperSearch::format_search_results("energy", &[]),
            "No search results found for: energy"
        );
    }

    #[test]
    fn test_base_url_override() {
        let section = SearchSection {
            base_url: Some("http://127.0.0.1:9999/".to_string()),
            ..SearchSection::default()
        };
        let search = SerperSearch::from_config(&section, "key".to_string()).unwrap();
        assert_eq!(search.endpoint, "http://127.0.0.1:9999/search");
        assert_eq!(search.max_results, section.max_results);
    }
}
