//! Shared fixtures for in-crate tests: a recording event sink, trivial
//! tools, and a loopback model-service transport that captures upstream
//! frames and plays back a scripted downstream sequence.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use sauti_tools::{Tool, ToolContext, ToolError};

use crate::error::Result;
use crate::events::{EventSink, SessionEvent};
use crate::transport::{
    Frame, InputFrameStream, ModelClientFactory, ModelServiceClient, OutputFrameStream,
};

pub(crate) struct RecordingSink {
    pub events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub(crate) struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Returns its parameters unchanged."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> sauti_tools::Result<Value> {
        Ok(params)
    }
}

pub(crate) struct FailingTool(pub &'static str);

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn description(&self) -> &'static str {
        "Always fails."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> sauti_tools::Result<Value> {
        Err(ToolError::Execution(self.0.to_string()))
    }
}

/// Captures every upstream frame and yields the scripted downstream frames,
/// then ends the response stream.
pub(crate) struct LoopbackFactory {
    script: Vec<Value>,
    sent: Arc<Mutex<Vec<Frame>>>,
}

impl LoopbackFactory {
    pub(crate) fn new(script: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            script,
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClientFactory for LoopbackFactory {
    async fn create(&self, _region: &str) -> Result<Arc<dyn ModelServiceClient>> {
        Ok(Arc::new(LoopbackClient {
            script: self.script.clone(),
            sent: self.sent.clone(),
        }))
    }
}

struct LoopbackClient {
    script: Vec<Value>,
    sent: Arc<Mutex<Vec<Frame>>>,
}

#[async_trait]
impl ModelServiceClient for LoopbackClient {
    async fn open_duplex(&self, mut input: InputFrameStream) -> Result<OutputFrameStream> {
        let sent = self.sent.clone();
        tokio::spawn(async move {
            while let Some(frame) = input.next().await {
                sent.lock().unwrap().push(frame);
            }
        });

        let frames: Vec<Result<Frame>> = self
            .script
            .iter()
            .map(|value| {
                Ok(Frame {
                    bytes: serde_json::to_vec(value).unwrap(),
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(frames)))
    }
}
