//! Downstream event parsing.
//!
//! Every frame from the model service is a JSON envelope
//! `{"event":{"<kind>":{...}}}`. Kinds the orchestrator acts on get typed
//! payloads (with unknown fields preserved for relay); everything else is
//! carried as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// Stop reason on a `contentEnd` marking a tool invocation request.
pub const CONTENT_TYPE_TOOL: &str = "TOOL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutputPayload {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputPayload {
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsePayload {
    pub tool_use_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEndPayload {
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentEndPayload {
    pub fn is_tool(&self) -> bool {
        self.content_type.as_deref() == Some(CONTENT_TYPE_TOOL)
    }
}

#[derive(Debug, Clone)]
pub enum DownstreamEvent {
    ContentStart(Value),
    TextOutput(TextOutputPayload),
    AudioOutput(AudioOutputPayload),
    ToolUse(ToolUsePayload),
    ContentEnd(ContentEndPayload),
    CompletionStart(Value),
    UsageEvent(Value),
    /// Transport-level error frame (`modelStreamErrorException`,
    /// `internalServerException`). Does not close the session by itself.
    StreamError { error_type: String, details: Value },
    Unknown { kind: String, payload: Value },
}

impl DownstreamEvent {
    /// Parse one framed envelope. Only malformed JSON is an error; an
    /// unexpected envelope shape or kind degrades to `Unknown`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| GatewayError::Protocol(format!("malformed downstream frame: {e}")))?;

        let Some(event) = value.get("event").and_then(Value::as_object) else {
            return Ok(DownstreamEvent::Unknown {
                kind: "unknown".to_string(),
                payload: value,
            });
        };
        let Some((kind, payload)) = event.iter().next() else {
            return Ok(DownstreamEvent::Unknown {
                kind: "unknown".to_string(),
                payload: Value::Null,
            });
        };

        Ok(match kind.as_str() {
            "contentStart" => DownstreamEvent::ContentStart(payload.clone()),
            "textOutput" => match serde_json::from_value(payload.clone()) {
                Ok(parsed) => DownstreamEvent::TextOutput(parsed),
                Err(_) => unknown(kind, payload),
            },
            "audioOutput" => match serde_json::from_value(payload.clone()) {
                Ok(parsed) => DownstreamEvent::AudioOutput(parsed),
                Err(_) => unknown(kind, payload),
            },
            "toolUse" => match serde_json::from_value(payload.clone()) {
                Ok(parsed) => DownstreamEvent::ToolUse(parsed),
                Err(_) => unknown(kind, payload),
            },
            "contentEnd" => match serde_json::from_value(payload.clone()) {
                Ok(parsed) => DownstreamEvent::ContentEnd(parsed),
                Err(_) => unknown(kind, payload),
            },
            "completionStart" => DownstreamEvent::CompletionStart(payload.clone()),
            "usageEvent" => DownstreamEvent::UsageEvent(payload.clone()),
            "modelStreamErrorException" | "internalServerException" => {
                DownstreamEvent::StreamError {
                    error_type: kind.clone(),
                    details: payload.clone(),
                }
            }
            _ => unknown(kind, payload),
        })
    }

    /// Wire name for relaying to the client.
    pub fn kind(&self) -> &str {
        match self {
            DownstreamEvent::ContentStart(_) => "contentStart",
            DownstreamEvent::TextOutput(_) => "textOutput",
            DownstreamEvent::AudioOutput(_) => "audioOutput",
            DownstreamEvent::ToolUse(_) => "toolUse",
            DownstreamEvent::ContentEnd(_) => "contentEnd",
            DownstreamEvent::CompletionStart(_) => "completionStart",
            DownstreamEvent::UsageEvent(_) => "usageEvent",
            DownstreamEvent::StreamError { error_type, .. } => error_type,
            DownstreamEvent::Unknown { kind, .. } => kind,
        }
    }

    /// Payload in its original wire shape, for relaying to the client.
    pub fn payload(&self) -> Value {
        match self {
            DownstreamEvent::ContentStart(v)
            | DownstreamEvent::CompletionStart(v)
            | DownstreamEvent::UsageEvent(v) => v.clone(),
            DownstreamEvent::TextOutput(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            DownstreamEvent::AudioOutput(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            DownstreamEvent::ToolUse(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            DownstreamEvent::ContentEnd(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            DownstreamEvent::StreamError { details, .. } => details.clone(),
            DownstreamEvent::Unknown { payload, .. } => payload.clone(),
        }
    }
}

fn unknown(kind: &str, payload: &Value) -> DownstreamEvent {
    DownstreamEvent::Unknown {
        kind: kind.to_string(),
        payload: payload.clone(),
    }
}

/// True when assistant text carries the in-band barge-in marker. Whitespace
/// inside the marker is ignored.
pub fn contains_interrupted_marker(content: &str) -> bool {
    let compact: String = content.split_whitespace().collect();
    compact.contains(r#"{"interrupted":true}"#)
}
