// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Method};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::config_schema;
use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

static HTTP_SCHEMA: Lazy<Value> = Lazy::new(config_schema::<HttpConfig>);

/// Longest response excerpt quoted in an error message
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct HttpConfig {
    /// HTTP method, GET when omitted
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Request body; defaults to the node's input for methods other than GET/HEAD
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Performs an HTTP request and emits `{status, headers, body}`
pub struct HttpNode {
    client: Client,
}

impl HttpNode {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpNode {
    fn node_type(&self) -> &str {
        "http"
    }

    fn display_name(&self) -> &str {
        "HTTP Request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request and return the response"
    }

    fn group(&self) -> &str {
        "integrations"
    }

    fn schema(&self) -> Option<&Value> {
        Some(&*HTTP_SCHEMA)
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: HttpConfig = ctx.config()?;
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| NodeError::invalid_input(format!("Invalid HTTP method '{}'", config.method)))?;

        let mut request = self.client.request(method.clone(), &config.url);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        let input = ctx.main_input();
        let body = config.body.or_else(|| {
            let sends_input = method != Method::GET && method != Method::HEAD && !input.is_null();
            sends_input.then(|| input.clone())
        });
        if let Some(body) = &body {
            request = request.json(body);
        }

        log::debug!("Node '{}': {} {}", ctx.node_id, method, config.url);
        let response = tokio::select! {
            response = request.send() => response?,
            _ = ctx.cancel.cancelled() => return Err(NodeError::canceled()),
        };

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), Value::String(v.to_string())))
            })
            .collect();
        let text = response.text().await?;

        if !status.is_success() {
            let excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(NodeError::failed(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                config.url,
                excerpt
            )));
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(NodeOutput::main(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        })))
    }
}
