//! Tool dispatcher: executes tool invocations off the stream path and
//! interleaves their results back into the upstream sequence.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use sauti_tools::{ToolContext, ToolRegistry};

use crate::events::{SessionEvent, ToolResultEvent, UpstreamEvent};
use crate::session::{ActiveToolContext, Session};

/// Pauses around the tool-result triple so the model's stream reader
/// observes `contentStart` before the payload and the completion after it.
const CONTENT_START_PAUSE: Duration = Duration::from_millis(50);
const RESULT_PAUSE: Duration = Duration::from_millis(50);
const CONTENT_END_PAUSE: Duration = Duration::from_millis(100);

/// Cap on the stringified result injected upstream, to bound model context
/// inflation.
pub const MAX_TOOL_RESULT_CHARS: usize = 20_480;
const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Run one tool invocation as a detached task keyed by its `toolUseId`.
/// Results from concurrent invocations may interleave in any order; the
/// model correlates them by id.
pub(crate) fn spawn(session: Arc<Session>, tools: Arc<ToolRegistry>, context: ActiveToolContext) {
    tokio::spawn(async move {
        execute(session, tools, context).await;
    });
}

async fn execute(session: Arc<Session>, tools: Arc<ToolRegistry>, context: ActiveToolContext) {
    let started = Instant::now();
    let params = parse_tool_params(&context.content);
    let tool_ctx = ToolContext {
        max_tokens: session.config().inference.max_tokens,
        top_p: session.config().inference.top_p,
        temperature: session.config().inference.temperature,
    };

    let outcome = tools
        .execute(&context.tool_name, params, &tool_ctx)
        .await;

    let (result, failed) = match outcome {
        Ok(value) => {
            let business_failure = value
                .get("error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (value, business_failure)
        }
        Err(err) => {
            warn!(
                session_id = %session.id(),
                tool = %context.tool_name,
                %err,
                "tool execution failed"
            );
            (json!({"error": true, "message": err.to_string()}), true)
        }
    };
    let execution_time_ms = started.elapsed().as_millis() as u64;
    debug!(
        session_id = %session.id(),
        tool = %context.tool_name,
        tool_use_id = %context.tool_use_id,
        execution_time_ms,
        failed,
        "tool execution finished"
    );

    if session.is_active() {
        emit_result_upstream(&session, &context.tool_use_id, &result).await;
    }

    session.emit(SessionEvent::ToolResult(ToolResultEvent {
        tool_use_id: context.tool_use_id,
        tool_name: context.tool_name,
        result,
        execution_time_ms,
        error: failed,
    }));
}

/// Inject the result triple with a fresh content name, paced so in-order
/// delivery at the model service is observable.
async fn emit_result_upstream(session: &Session, tool_use_id: &str, result: &Value) {
    let content_name = Uuid::new_v4().to_string();
    let content = sanitize_tool_result(&result.to_string());

    session.enqueue_tool_event(UpstreamEvent::content_start_tool(
        session.prompt_name(),
        &content_name,
        tool_use_id,
    ));
    tokio::time::sleep(CONTENT_START_PAUSE).await;
    session.enqueue_tool_event(UpstreamEvent::tool_result(
        session.prompt_name(),
        &content_name,
        content,
    ));
    tokio::time::sleep(RESULT_PAUSE).await;
    session.enqueue_tool_event(UpstreamEvent::content_end(
        session.prompt_name(),
        &content_name,
    ));
    tokio::time::sleep(CONTENT_END_PAUSE).await;
}

/// Tool parameters arrive either as a JSON object or as a string that should
/// contain JSON; a string that does not parse is passed through wrapped.
pub(crate) fn parse_tool_params(content: &Value) -> Value {
    match content {
        Value::String(raw) => match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(_) => json!({"content": raw}),
        },
        Value::Null => json!({}),
        other => other.clone(),
    }
}

/// Strip ASCII control characters (keeping tab, newline, carriage return)
/// and cap the length so one tool cannot flood the model's context.
pub fn sanitize_tool_result(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    match cleaned.char_indices().nth(MAX_TOOL_RESULT_CHARS) {
        Some((cut, _)) => format!("{}{}", &cleaned[..cut], TRUNCATION_SUFFIX),
        None => cleaned,
    }
}
