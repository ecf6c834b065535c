//! Tool trait, registry and the generic tool adapters
//!
//! Every external data provider (geocoding, transit routing, hazard maps, ...)
//! is consumed through [`Tool`]. The pipeline never looks inside a provider;
//! it only needs calls that can be awaited independently and that report
//! failure as an `Err`.

use crate::error::{Error, Result};
use crate::plan::ContentType;
use crate::types::RunId;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Run the call belongs to
    pub run_id: RunId,
    /// Plan index of the calling worker
    pub item_index: usize,
    /// Content type of the calling worker
    pub content_type: ContentType,
}

impl ToolContext {
    /// Create a new tool context
    pub fn new(run_id: RunId, item_index: usize, content_type: ContentType) -> Self {
        Self {
            run_id,
            item_index,
            content_type,
        }
    }
}

/// Tool trait defining the interface for external data lookups
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier for this tool
    fn id(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Execute the tool; the returned value must be a JSON object
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;

    /// Optional: Validate parameters before execution
    fn validate(&self, params: &Value) -> Result<()> {
        if params.is_object() {
            Ok(())
        } else {
            Err(Error::tool_execution(self.id(), "parameters must be a JSON object"))
        }
    }

    /// Reference recorded in `sourceRefs` when this tool contributed data
    fn source_ref(&self) -> String {
        format!("tool:{}", self.id())
    }
}

/// Outcome of one tool call, owned by the calling worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Tool id
    pub tool_name: String,
    /// Returned payload; empty on failure
    pub payload: Map<String, Value>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Source reference for attribution
    #[serde(skip)]
    pub source_ref: String,
}

impl ToolResult {
    /// Create a successful result
    pub fn ok(tool_name: impl Into<String>, payload: Map<String, Value>, source_ref: String) -> Self {
        Self {
            tool_name: tool_name.into(),
            payload,
            error: None,
            source_ref,
        }
    }

    /// Create a failed result
    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        let tool_name = tool_name.into();
        Self {
            source_ref: format!("tool:{}", tool_name),
            tool_name,
            payload: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Whether the call succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run a tool and fold any failure into the result
pub async fn call_tool(tool: &dyn Tool, params: Value, ctx: &ToolContext) -> ToolResult {
    let outcome = async {
        tool.validate(&params)?;
        match tool.execute(params, ctx).await? {
            Value::Object(payload) => Ok(payload),
            other => Err(Error::tool_execution(
                tool.id(),
                format!("expected a JSON object, got {}", json_kind(&other)),
            )),
        }
    }
    .await;

    match outcome {
        Ok(payload) => ToolResult::ok(tool.id(), payload, tool.source_ref()),
        Err(e) => ToolResult::failed(tool.id(), e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Tools available to workers, keyed by id
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same id
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let id = tool.id().to_string();
        if self.tools.insert(id.clone(), tool).is_some() {
            tracing::warn!(tool = %id, "tool registered twice, replacing previous registration");
        }
        self
    }

    /// Builder-style registration
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Look up a tool
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.ids()).finish()
    }
}

/// Tool that always returns the same payload; for fixtures and offline runs
pub struct StaticTool {
    id: String,
    payload: Value,
}

impl StaticTool {
    /// Create a static tool
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Returns a fixed payload"
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(self.payload.clone())
    }
}

/// Tool backed by a JSON-over-HTTP endpoint.
///
/// Parameters are POSTed as the JSON body; the response body must be a JSON
/// object and becomes the payload.
pub struct HttpTool {
    id: String,
    description: String,
    endpoint: Url,
    client: Client,
    source_ref: Option<String>,
}

impl HttpTool {
    /// Create an HTTP tool with a default 30 second timeout
    pub fn new(id: impl Into<String>, endpoint: Url) -> Result<Self> {
        Self::with_timeout(id, endpoint, Duration::from_secs(30))
    }

    /// Create an HTTP tool with a custom timeout
    pub fn with_timeout(id: impl Into<String>, endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let id = id.into();
        Ok(Self {
            description: format!("HTTP lookup at {}", endpoint.host_str().unwrap_or("unknown host")),
            id,
            endpoint,
            client,
            source_ref: None,
        })
    }

    /// Override the attribution recorded in `sourceRefs`
    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("X-Run-Id", ctx.run_id.to_string())
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::tool_execution(&self.id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::tool_execution(
                &self.id,
                format!("status {}: {}", status, body),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::tool_execution(&self.id, format!("invalid JSON: {}", e)))
    }

    fn source_ref(&self) -> String {
        self.source_ref
            .clone()
            .unwrap_or_else(|| format!("tool:{}", self.id))
    }
}
