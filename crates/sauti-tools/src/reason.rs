//! Delegated reasoning call against a text LLM via Bedrock Converse.
//!
//! The speech model keeps latency low by staying small; questions that need
//! multi-step reasoning are handed to a larger text model and the answer is
//! spoken back.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, InferenceConfiguration, Message, SystemContentBlock,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use serde_json::{json, Value};
use tracing::debug;

use crate::{require_str, Result, Tool, ToolContext, ToolError};

const SYSTEM_PROMPT: &str =
    "You are a careful reasoning assistant. Answer concisely in plain prose suitable for being read aloud.";

pub struct ReasoningTool {
    client: aws_sdk_bedrockruntime::Client,
    model_id: String,
}

impl ReasoningTool {
    pub fn new(client: aws_sdk_bedrockruntime::Client, model_id: String) -> Self {
        Self { client, model_id }
    }
}

#[async_trait]
impl Tool for ReasoningTool {
    fn name(&self) -> &'static str {
        "ask_reasoning_model"
    }

    fn description(&self) -> &'static str {
        "Delegates a hard question to a larger text model and returns its answer."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The full question, with any context the model needs."
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let question = require_str(&params, "question")?;
        debug!(model_id = %self.model_id, "delegating question to reasoning model");

        let message = Message::builder()
            .role(ConversationRole::User)
            .content(ContentBlock::Text(question.to_string()))
            .build()
            .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let inference = InferenceConfiguration::builder()
            .max_tokens(ctx.max_tokens as i32)
            .temperature(ctx.temperature)
            .top_p(ctx.top_p)
            .build();

        let output = self
            .client
            .converse()
            .model_id(&self.model_id)
            .system(SystemContentBlock::Text(SYSTEM_PROMPT.to_string()))
            .messages(message)
            .inference_config(inference)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("{}", DisplayErrorContext(&e))))?;

        let answer = output
            .output()
            .and_then(|o| o.as_message().ok())
            .map(|m| {
                m.content()
                    .iter()
                    .filter_map(|block| block.as_text().ok())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if answer.is_empty() {
            return Ok(json!({
                "error": true,
                "message": "Reasoning model returned no text output",
            }));
        }

        Ok(json!({"answer": answer}))
    }
}
