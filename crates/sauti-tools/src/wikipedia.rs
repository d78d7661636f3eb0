//! Article lookup via the Wikipedia REST API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{require_str, Result, Tool, ToolContext};

const SEARCH_URL: &str = "https://en.wikipedia.org/w/rest.php/v1/search/page";
const SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";

#[derive(Debug, Clone)]
pub struct WikipediaTool {
    http: reqwest::Client,
}

impl WikipediaTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pages: Vec<SearchPage>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    key: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    title: String,
    extract: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: PageUrl,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &'static str {
        "search_wikipedia"
    }

    fn description(&self) -> &'static str {
        "Searches Wikipedia and returns a short summary of the best-matching article."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Topic to look up, e.g. \"submersible pump\"."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let query = require_str(&params, "query")?;
        debug!(query, "searching wikipedia");

        let search: SearchResponse = self
            .http
            .get(SEARCH_URL)
            .query(&[("q", query), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(page) = search.pages.into_iter().next() else {
            return Ok(json!({
                "error": true,
                "message": format!("No Wikipedia article found for \"{query}\""),
            }));
        };

        let summary: SummaryResponse = self
            .http
            .get(format!("{SUMMARY_URL}/{}", page.key))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(json!({
            "title": summary.title,
            "summary": summary.extract,
            "description": summary.description,
            "url": summary.content_urls.map(|u| u.desktop.page),
            "matchedTitle": page.title,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolError;

    #[tokio::test]
    async fn rejects_blank_query() {
        let tool = WikipediaTool::new(reqwest::Client::new());
        let err = tool
            .execute(json!({"query": ""}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn parses_search_page_shape() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"pages":[{"id":1,"key":"Borewell","title":"Borewell","excerpt":"..."}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.pages[0].key, "Borewell");
    }
}
