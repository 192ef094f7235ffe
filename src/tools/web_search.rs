//! Web search via the `DuckDuckGo` instant answer API

use super::{Tool, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";
const DEFAULT_MAX_RESULTS: usize = 5;

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InstantAnswer {
    heading: String,
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    answer: String,
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RelatedTopic {
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
    topics: Vec<RelatedTopic>,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

/// Flatten grouped topics into (text, url) pairs
fn collect_topics<'a>(topics: &'a [RelatedTopic], out: &mut Vec<(&'a str, Option<&'a str>)>) {
    for topic in topics {
        if let Some(text) = topic.text.as_deref().filter(|t| !t.is_empty()) {
            out.push((text, topic.first_url.as_deref()));
        }
        collect_topics(&topic.topics, out);
    }
}

fn render(query: &str, answer: &InstantAnswer, max_results: usize) -> String {
    let mut sections = Vec::new();

    if !answer.answer.is_empty() {
        sections.push(format!("Answer: {}", answer.answer));
    }
    if !answer.abstract_text.is_empty() {
        let mut summary = String::new();
        if !answer.heading.is_empty() {
            summary.push_str(&answer.heading);
            summary.push_str(": ");
        }
        summary.push_str(&answer.abstract_text);
        if !answer.abstract_url.is_empty() {
            summary.push_str(&format!(" ({})", answer.abstract_url));
        }
        sections.push(summary);
    }

    let mut topics = Vec::new();
    collect_topics(&answer.related_topics, &mut topics);
    let related: Vec<String> = topics
        .into_iter()
        .take(max_results)
        .map(|(text, url)| match url {
            Some(url) => format!("- {text} ({url})"),
            None => format!("- {text}"),
        })
        .collect();
    if !related.is_empty() {
        sections.push(format!("Related:\n{}", related.join("\n")));
    }

    if sections.is_empty() {
        format!("No results found for '{query}'")
    } else {
        sections.join("\n\n")
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> String {
        "Search the web for current information. Returns a short summary and related links."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of related results (default 5)"
                }
            }
        })
    }

    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let input: SearchInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {e}"))),
        };
        if input.query.trim().is_empty() {
            return Ok(ToolOutput::error("query must not be empty"));
        }

        let body = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", input.query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        // The API sometimes answers with an empty body for unknown queries
        let answer: InstantAnswer = if body.trim().is_empty() {
            InstantAnswer::default()
        } else {
            match serde_json::from_str(&body) {
                Ok(a) => a,
                Err(e) => return Ok(ToolOutput::error(format!("Unexpected search response: {e}"))),
            }
        };

        let max_results = input.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        Ok(ToolOutput::success(render(&input.query, &answer, max_results)))
    }
}
