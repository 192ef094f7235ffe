//! Latest stock quote from Alpha Vantage

use super::{Tool, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://www.alphavantage.co/query";

pub struct StockPriceTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct StockInput {
    symbol: String,
}

impl StockPriceTool {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self::with_endpoint(client, api_key, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(
        client: reqwest::Client,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &'static str {
        "get_stock_price"
    }

    fn description(&self) -> String {
        "Fetch the latest stock price for a ticker symbol (e.g. 'AAPL', 'TSLA').".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["symbol"],
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Ticker symbol"
                }
            }
        })
    }

    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let input: StockInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {e}"))),
        };
        let symbol = input.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Ok(ToolOutput::error("symbol must not be empty"));
        }

        let body: Value = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Rate limiting and bad keys come back as 200 with a message field
        for key in ["Error Message", "Note", "Information"] {
            if let Some(message) = body.get(key).and_then(Value::as_str) {
                return Ok(ToolOutput::error(message));
            }
        }

        match body.get("Global Quote") {
            Some(quote) if quote.as_object().is_some_and(|q| !q.is_empty()) => {
                Ok(ToolOutput::success(quote.to_string()))
            }
            _ => Ok(ToolOutput::error(format!("No quote found for {symbol}"))),
        }
    }
}
