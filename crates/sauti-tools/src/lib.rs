//! Tool interface and registry for the sauti voice gateway.
//!
//! A tool is a named, schema-described operation the speech model may invoke
//! mid-conversation. The gateway resolves tools case-insensitively, executes
//! them off the streaming path, and feeds their JSON results back to the
//! model, so every implementation here must be reentrant and return
//! JSON-serializable values.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub mod datetime;
pub mod geocode;
pub mod knowledge;
pub mod reason;
pub mod weather;
pub mod wikipedia;

pub use datetime::DateTimeTool;
pub use geocode::GeocodeTool;
pub use knowledge::KnowledgeBaseTool;
pub use reason::ReasoningTool;
pub use weather::WeatherTool;
pub use wikipedia::WikipediaTool;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not supported: {0}")]
    Unknown(String),
    #[error("Invalid tool parameters: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Execution(String),
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Execution(format!("HTTP request failed: {e}"))
    }
}

/// Inference knobs forwarded from the invoking session so a tool may pass
/// them along to a downstream LLM call.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }
}

/// A spec entry materialized for injection into the model's prompt-start
/// event. The schema is pre-serialized because the wire format carries it as
/// a JSON string, not a nested object.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name, matched case-insensitively by the registry.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON-Schema descriptor for the tool's input object.
    fn input_schema(&self) -> Value;

    /// Run the tool. A returned object may carry `{"error": true, "message"}`
    /// to signal a business-level failure distinct from `Err(_)`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Name-indexed tool lookup. Process-wide and immutable after startup.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools
            .insert(tool.name().to_lowercase(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_lowercase()).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Materialize `{name, description, schema}` entries, restricted to
    /// `enabled` when a session supplies an allow-list. Enabled names are
    /// compared case-insensitively, like lookups.
    pub fn specs(&self, enabled: Option<&HashSet<String>>) -> Vec<ToolSpec> {
        let enabled_lower: Option<HashSet<String>> =
            enabled.map(|set| set.iter().map(|n| n.to_lowercase()).collect());

        let mut specs: Vec<ToolSpec> = self
            .tools
            .iter()
            .filter(|(key, _)| {
                enabled_lower
                    .as_ref()
                    .map(|set| set.contains(key.as_str()))
                    .unwrap_or(true)
            })
            .map(|(_, tool)| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.input_schema().to_string(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.execute(params, ctx).await
    }
}

/// Extract a required string parameter from a tool's input object.
pub(crate) fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required parameter `{key}`")))
}

/// Extract a required finite number parameter.
pub(crate) fn require_f64(params: &Value, key: &str) -> Result<f64> {
    params
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required parameter `{key}`")))
}
