//! Downstream demultiplexer: reads framed model-service events and routes
//! them by kind.
//!
//! Handlers never block this loop; tool execution is offloaded to detached
//! tasks and everything else is a synchronous dispatch into the sink.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use sauti_tools::ToolRegistry;

use crate::dispatch;
use crate::events::{
    contains_interrupted_marker, DownstreamEvent, ErrorEvent, SessionEvent,
};
use crate::session::{now_unix_millis, ActiveToolContext, Session};
use crate::transport::{OutputFrameStream, StreamPermits};

/// Per-session read loop over the model's response stream. Ends on
/// end-of-stream or when the session's close signal fires; either way a
/// `streamComplete` event is surfaced.
pub(crate) async fn run(
    session: Arc<Session>,
    tools: Arc<ToolRegistry>,
    mut frames: OutputFrameStream,
    permits: StreamPermits,
) {
    loop {
        tokio::select! {
            _ = session.close_token().cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => handle_frame(&session, &tools, &frame.bytes),
                Some(Err(err)) => {
                    warn!(session_id = %session.id(), %err, "model response stream error");
                    session.emit(SessionEvent::Error(ErrorEvent {
                        message: err.to_string(),
                        details: None,
                        source: Some("responseStream".to_string()),
                        error_type: None,
                    }));
                }
                None => break,
            }
        }
    }
    drop(permits);
    session.touch();
    debug!(session_id = %session.id(), "model response stream complete");
    session.emit(SessionEvent::StreamComplete {
        timestamp_ms: now_unix_millis(),
    });
}

/// Dispatch one frame: update activity, route special cases, and forward the
/// event to the sink in arrival order.
pub(crate) fn handle_frame(session: &Arc<Session>, tools: &Arc<ToolRegistry>, bytes: &[u8]) {
    session.touch();

    let event = match DownstreamEvent::parse(bytes) {
        Ok(event) => event,
        Err(err) => {
            warn!(session_id = %session.id(), %err, "dropping malformed downstream frame");
            session.emit(SessionEvent::Error(ErrorEvent::new(err.to_string())));
            return;
        }
    };

    match &event {
        DownstreamEvent::ToolUse(tool_use) => {
            debug!(
                session_id = %session.id(),
                tool = %tool_use.tool_name,
                tool_use_id = %tool_use.tool_use_id,
                "tool use requested"
            );
            session.note_tool_use(ActiveToolContext {
                tool_use_id: tool_use.tool_use_id.clone(),
                tool_name: tool_use.tool_name.clone(),
                content: tool_use.content.clone(),
            });
        }
        DownstreamEvent::ContentEnd(end) if end.is_tool() => {
            match session.take_active_tool() {
                Some(context) => dispatch::spawn(session.clone(), tools.clone(), context),
                None => warn!(
                    session_id = %session.id(),
                    "tool content end without a preceding tool use"
                ),
            }
        }
        DownstreamEvent::TextOutput(text) if contains_interrupted_marker(&text.content) => {
            // The user spoke over the assistant; tell the client before the
            // text itself arrives.
            session.emit(SessionEvent::BargeIn);
        }
        DownstreamEvent::StreamError { error_type, details } => {
            warn!(session_id = %session.id(), error_type, "model stream exception frame");
            session.emit(SessionEvent::Error(ErrorEvent::response_stream(
                error_type.clone(),
                details.clone(),
            )));
            // The state machine decides whether to close; nothing more here.
            return;
        }
        _ => {}
    }

    session.emit(SessionEvent::Downstream(event));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::testing::RecordingSink;
    use serde_json::json;

    fn frame(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn session_with_sink() -> (Arc<Session>, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let session = Session::new(SessionConfig::default(), sink.clone());
        (session, sink)
    }

    #[test]
    fn barge_in_precedes_the_text_output_dispatch() {
        let (session, sink) = session_with_sink();
        let tools = Arc::new(ToolRegistry::new());

        handle_frame(
            &session,
            &tools,
            &frame(json!({"event": {"textOutput": {"content": "{\"interrupted\":true}"}}})),
        );

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::BargeIn));
        assert!(matches!(
            events[1],
            SessionEvent::Downstream(DownstreamEvent::TextOutput(_))
        ));
    }

    #[test]
    fn plain_text_output_has_no_barge_in() {
        let (session, sink) = session_with_sink();
        let tools = Arc::new(ToolRegistry::new());

        handle_frame(
            &session,
            &tools,
            &frame(json!({"event": {"textOutput": {"content": "hello there"}}})),
        );

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Downstream(_)));
    }

    #[test]
    fn tool_use_is_cached_until_its_content_end() {
        let (session, _sink) = session_with_sink();
        let tools = Arc::new(ToolRegistry::new());

        handle_frame(
            &session,
            &tools,
            &frame(json!({"event": {"toolUse": {
                "toolUseId": "t-9",
                "toolName": "get_weather",
                "content": {"latitude": 1.0}
            }}})),
        );

        let cached = session.take_active_tool().unwrap();
        assert_eq!(cached.tool_use_id, "t-9");
        assert_eq!(cached.tool_name, "get_weather");
    }

    #[test]
    fn stream_exceptions_surface_as_response_stream_errors() {
        let (session, sink) = session_with_sink();
        let tools = Arc::new(ToolRegistry::new());

        handle_frame(
            &session,
            &tools,
            &frame(json!({"event": {"modelStreamErrorException": {"message": "boom"}}})),
        );

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let SessionEvent::Error(error) = &events[0] else {
            panic!("expected error event");
        };
        assert_eq!(error.source.as_deref(), Some("responseStream"));
        assert_eq!(
            error.error_type.as_deref(),
            Some("modelStreamErrorException")
        );
        // The session is untouched; the state machine decides what happens.
        assert_eq!(session.state(), crate::session::SessionState::Initializing);
    }

    #[test]
    fn frames_update_last_activity() {
        let (session, _sink) = session_with_sink();
        let tools = Arc::new(ToolRegistry::new());
        session.set_last_activity_millis(0);

        handle_frame(
            &session,
            &tools,
            &frame(json!({"event": {"usageEvent": {"totalTokens": 5}}})),
        );
        assert!(session.last_activity_millis() > 0);
    }
}
