//! HTTP fetch tool — GET a URL with a response-size cap.

use serde::Deserialize;
use serde_json::Value;

use minder_domain::tool::{ToolDefinition, ToolError};

use crate::context::ToolContext;
use crate::registry::ToolHandler;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct FetchRequest {
    url: String,
}

pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for HttpFetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "http_fetch".into(),
            description: "Fetch a URL over HTTP GET and return the body text.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "http(s) URL to fetch" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: FetchRequest =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_args(e.to_string()))?;

        if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
            return Err(ToolError::invalid_args(format!(
                "only http(s) URLs are supported: {}",
                req.url
            )));
        }

        let resp = self
            .client
            .get(&req.url)
            .timeout(std::time::Duration::from_secs(30))
            .header(reqwest::header::USER_AGENT, "minder/0.1")
            .send()
            .await
            .map_err(|e| ToolError::external(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::external(e.to_string()))?;

        let truncated = body.len() > MAX_BODY_BYTES;
        let body = if truncated {
            let mut end = MAX_BODY_BYTES;
            while !body.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            body[..end].to_string()
        } else {
            body
        };

        Ok(serde_json::json!({
            "url": req.url,
            "status": status,
            "truncated": truncated,
            "body": body,
        }))
    }
}
