//! HTTP request tool — GET/POST with a response size ceiling.

use async_trait::async_trait;
use ironloop_core::{SideEffect, Tool, ToolError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Responses larger than this come back as an error.
const MAX_RESPONSE_CHARS: usize = 48_000;

pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP GET or POST request and return the response body as text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to request"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP method: GET (default) or POST"
                },
                "body": {
                    "type": "string",
                    "description": "Request body for POST"
                }
            },
            "required": ["url"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::Network
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;
        let method = arguments["method"].as_str().unwrap_or("GET");

        debug!(url, method, "HTTP request");

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => {
                let body = arguments["body"].as_str().unwrap_or("").to_string();
                self.client.post(url).body(body)
            }
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unsupported method '{other}', use GET or POST"
                )))
            }
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ToolError::Cancelled("http_request".into())),
            response = request.send() => response,
        }
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "http_request".into(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "http_request".into(),
                reason: e.to_string(),
            })?;

        if body.len() > MAX_RESPONSE_CHARS {
            return Err(ToolError::ExecutionFailed {
                tool_name: "http_request".into(),
                reason: format!(
                    "response too large ({} chars, limit {}). Request a narrower resource",
                    body.len(),
                    MAX_RESPONSE_CHARS
                ),
            });
        }

        Ok(format!("[{status}]\n{body}"))
    }
}
