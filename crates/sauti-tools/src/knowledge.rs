//! RAG retrieval against a Bedrock knowledge base.

use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::types::KnowledgeBaseQuery;
use aws_smithy_types::error::display::DisplayErrorContext;
use serde_json::{json, Value};
use tracing::debug;

use crate::{require_str, Result, Tool, ToolContext, ToolError};

const MAX_PASSAGES: usize = 5;

pub struct KnowledgeBaseTool {
    client: aws_sdk_bedrockagentruntime::Client,
    knowledge_base_id: String,
}

impl KnowledgeBaseTool {
    pub fn new(client: aws_sdk_bedrockagentruntime::Client, knowledge_base_id: String) -> Self {
        Self {
            client,
            knowledge_base_id,
        }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn name(&self) -> &'static str {
        "search_knowledge_base"
    }

    fn description(&self) -> &'static str {
        "Retrieves relevant passages from the product knowledge base for a user question."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language question to search the knowledge base with."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let query = require_str(&params, "query")?;
        debug!(query, knowledge_base_id = %self.knowledge_base_id, "retrieving from knowledge base");

        let query = KnowledgeBaseQuery::builder().text(query).build();

        let output = self
            .client
            .retrieve()
            .knowledge_base_id(&self.knowledge_base_id)
            .retrieval_query(query)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("{}", DisplayErrorContext(&e))))?;

        let passages: Vec<&str> = output
            .retrieval_results()
            .iter()
            .filter_map(|result| result.content().map(|c| c.text()))
            .take(MAX_PASSAGES)
            .collect();

        if passages.is_empty() {
            return Ok(json!({
                "answer": "No relevant information found in the knowledge base.",
                "fromKnowledgeBase": false,
            }));
        }

        Ok(json!({
            "answer": passages.join("\n\n"),
            "fromKnowledgeBase": true,
            "passageCount": passages.len(),
        }))
    }
}
