//! Protocol events flowing between the client, the gateway, and the model
//! service.
//!
//! Upstream events are strictly ordered and serialized by the session's
//! queue; downstream events arrive framed from the model service and are
//! demultiplexed by kind. Session events are the gateway-local union of both
//! sides plus synthetic events (barge-in, stream completion, tool results).

pub mod downstream;
pub mod upstream;

pub use downstream::{
    contains_interrupted_marker, AudioOutputPayload, ContentEndPayload, DownstreamEvent,
    TextOutputPayload, ToolUsePayload,
};
pub use upstream::UpstreamEvent;

use serde_json::Value;

/// Everything a session surfaces to its owner. The multiplexer installs one
/// [`EventSink`] per session and relays these to the client socket.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A model-service event relayed with its payload shape intact.
    Downstream(DownstreamEvent),
    /// The user spoke over the assistant; the client should silence playback.
    BargeIn,
    /// The model-service response stream ended.
    StreamComplete { timestamp_ms: u64 },
    /// A local tool invocation finished (successfully or not).
    ToolResult(ToolResultEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone)]
pub struct ToolResultEvent {
    pub tool_use_id: String,
    pub tool_name: String,
    pub result: Value,
    pub execution_time_ms: u64,
    pub error: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorEvent {
    pub message: String,
    pub details: Option<Value>,
    pub source: Option<String>,
    pub error_type: Option<String>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Transport-level error surfaced from the model's response stream.
    pub fn response_stream(error_type: impl Into<String>, details: Value) -> Self {
        let error_type = error_type.into();
        Self {
            message: format!("Model stream error: {error_type}"),
            details: Some(details),
            source: Some("responseStream".to_string()),
            error_type: Some(error_type),
        }
    }
}

/// Typed sink for session events. Kept as a trait object on the session so
/// the session never references the socket directly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // Receiver dropped means the client is gone; events are discarded.
        let _ = self.send(event);
    }
}
