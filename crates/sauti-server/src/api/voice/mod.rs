//! Client-facing websocket endpoint for `/ws`.
//!
//! Frontend responsibilities:
//! - microphone capture and playback
//! - silencing local playback on barge-in
//! - session renewal after `sessionClosed`
//!
//! Backend responsibilities:
//! - mapping client messages onto the session state machine
//! - relaying demultiplexed model events back to the client
//! - bounded-time shutdown on stop or disconnect

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, State,
    },
    response::Response,
    routing::get,
    Router,
};
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sauti_core::{
    EventSink, GatewayError, InferenceConfig, Session, SessionConfig, SessionEvent, ToolChoice,
    TurnDetectionConfig, DISCONNECT_CLEANUP_TIMEOUT, STOP_CLEANUP_TIMEOUT,
};

use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let correlation_id = ctx.correlation_id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, correlation_id))
}

/// Session parameters the client may supply on `initializeConnection` and
/// `startNewChat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionSetup {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    inference_config: Option<InferenceConfig>,
    #[serde(default)]
    turn_detection_config: Option<TurnDetectionConfig>,
    #[serde(default)]
    enabled_tools: Option<Vec<String>>,
    #[serde(default)]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    InitializeConnection {
        #[serde(flatten)]
        setup: SessionSetup,
    },
    #[serde(rename_all = "camelCase")]
    PromptStart {
        #[serde(default)]
        voice_id: Option<String>,
        #[serde(default)]
        output_sample_rate: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    SystemPrompt {
        content: String,
        #[serde(default)]
        voice_id: Option<String>,
    },
    AudioStart,
    AudioInput {
        audio: String,
    },
    TextInput {
        content: String,
    },
    StopAudio,
    StartNewChat {
        #[serde(default)]
        config: Option<SessionSetup>,
    },
}

struct ConnectionState {
    session: Option<Arc<Session>>,
    audio_started: bool,
}

async fn handle_socket(socket: WebSocket, state: AppState, correlation_id: String) {
    state.socket_connections.fetch_add(1, Ordering::Relaxed);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnectionState {
        session: None,
        audio_started: false,
    };

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!(%correlation_id, "websocket receive error: {err}");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if let Err(err) =
                    handle_text_message(&state, &out_tx, &mut conn, text.as_str()).await
                {
                    send_error(&out_tx, &err);
                }
            }
            Message::Binary(data) => {
                if let Err(err) = handle_audio_bytes(&conn, data.to_vec()) {
                    send_error(&out_tx, &err);
                }
            }
            Message::Close(_) => break,
            Message::Ping(payload) => {
                let _ = out_tx.send(Message::Pong(payload));
            }
            Message::Pong(_) => {}
        }
    }

    // Disconnect path: tighter budget than an explicit stop, and no
    // `sessionClosed` because the socket is already gone.
    conn.audio_started = false;
    if let Some(session) = conn.session.take() {
        debug!(%correlation_id, session_id = %session.id(), "closing session on disconnect");
        state
            .sessions
            .close_gracefully(session.id(), DISCONNECT_CLEANUP_TIMEOUT)
            .await;
    }
    state.socket_connections.fetch_sub(1, Ordering::Relaxed);
    drop(out_tx);
    let _ = writer.await;
}

async fn handle_text_message(
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<Message>,
    conn: &mut ConnectionState,
    text: &str,
) -> Result<(), GatewayError> {
    let message: ClientMessage = serde_json::from_str(text)
        .map_err(|err| GatewayError::Protocol(format!("invalid client message: {err}")))?;

    match message {
        ClientMessage::InitializeConnection { setup } => {
            if conn.session.is_some() {
                return Err(GatewayError::Protocol(
                    "connection already initialized; use startNewChat".to_string(),
                ));
            }
            open_session(state, out_tx, conn, setup).await;
        }
        ClientMessage::PromptStart {
            voice_id,
            output_sample_rate,
        } => {
            let session = require_session(conn)?;
            if let Err(err) = session.setup_session_and_prompt_start(
                voice_id,
                output_sample_rate,
                state.sessions.tools(),
            ) {
                session.fail_setup(&err);
            }
        }
        ClientMessage::SystemPrompt { content, voice_id } => {
            let _ = voice_id;
            let session = require_session(conn)?;
            if let Err(err) = session.setup_system_prompt(&content) {
                session.fail_setup(&err);
            }
        }
        ClientMessage::AudioStart => {
            let session = require_session(conn)?.clone();
            if let Err(err) = session.setup_start_audio() {
                session.fail_setup(&err);
                return Ok(());
            }
            // The whole preamble is queued; only now open the duplex stream
            // so the model service never reads a partial preamble.
            if let Err(err) = state.sessions.initiate_streaming(&session).await {
                warn!(session_id = %session.id(), %err, "failed to initiate streaming");
                return Ok(());
            }
            conn.audio_started = true;
            send_json(out_tx, json!({"type": "audioReady"}));
        }
        ClientMessage::AudioInput { audio } => {
            if !conn.audio_started {
                return Err(GatewayError::Protocol(
                    "audioInput before audioStart".to_string(),
                ));
            }
            let session = require_session(conn)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(audio.as_bytes())
                .map_err(|err| GatewayError::Protocol(format!("invalid audio payload: {err}")))?;
            session.stream_audio(bytes);
        }
        ClientMessage::TextInput { content } => {
            let session = require_session(conn)?.clone();
            state.sessions.send_text_input(&session, &content).await?;
        }
        ClientMessage::StopAudio => {
            close_session(state, out_tx, conn, STOP_CLEANUP_TIMEOUT).await;
        }
        ClientMessage::StartNewChat { config } => {
            close_session(state, out_tx, conn, STOP_CLEANUP_TIMEOUT).await;
            open_session(state, out_tx, conn, config.unwrap_or_default()).await;
        }
    }

    Ok(())
}

fn handle_audio_bytes(conn: &ConnectionState, bytes: Vec<u8>) -> Result<(), GatewayError> {
    if !conn.audio_started {
        return Err(GatewayError::Protocol(
            "binary audio before audioStart".to_string(),
        ));
    }
    let session = conn
        .session
        .as_ref()
        .ok_or_else(|| GatewayError::SessionLifecycle("no active session".to_string()))?;
    session.stream_audio(bytes);
    Ok(())
}

/// Create a session, install its event relay, and ack the client.
async fn open_session(
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<Message>,
    conn: &mut ConnectionState,
    setup: SessionSetup,
) {
    let config = SessionConfig {
        region: setup.region,
        inference: setup.inference_config.unwrap_or_default(),
        turn_detection: setup.turn_detection_config,
        tool_choice: setup.tool_choice.unwrap_or_default(),
        enabled_tools: setup
            .enabled_tools
            .map(|names| names.into_iter().collect()),
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let sink: Arc<dyn EventSink> = Arc::new(event_tx);

    match state.sessions.create_session(config, sink).await {
        Ok(session) => {
            tokio::spawn(relay_events(event_rx, out_tx.clone()));
            debug!(session_id = %session.id(), "session opened");
            conn.session = Some(session);
            conn.audio_started = false;
            send_json(out_tx, json!({"type": "initialized", "data": {"success": true}}));
        }
        Err(err) => {
            send_json(
                out_tx,
                json!({"type": "initialized", "data": {"success": false, "error": err.to_string()}}),
            );
        }
    }
}

/// Graceful shutdown on `stopAudio` / `startNewChat`. Always tells the
/// client the session is gone so the UI can renew.
async fn close_session(
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<Message>,
    conn: &mut ConnectionState,
    timeout: Duration,
) {
    conn.audio_started = false;
    if let Some(session) = conn.session.take() {
        let was_active = session.is_active();
        let clean = state.sessions.close_gracefully(session.id(), timeout).await;
        if !clean && was_active {
            send_json(out_tx, json!({"type": "streamInterrupted"}));
        }
    }
    send_json(out_tx, json!({"type": "sessionClosed"}));
}

/// Forward session events to the socket with their payload shapes intact.
async fn relay_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    out_tx: mpsc::UnboundedSender<Message>,
) {
    while let Some(event) = events.recv().await {
        let payload = match event {
            SessionEvent::Downstream(inner) => {
                json!({"type": inner.kind(), "data": inner.payload()})
            }
            SessionEvent::BargeIn => json!({"type": "bargeIn", "data": {"interrupted": true}}),
            SessionEvent::StreamComplete { timestamp_ms } => {
                json!({"type": "streamComplete", "data": {"timestamp": timestamp_ms}})
            }
            SessionEvent::ToolResult(result) => json!({
                "type": "toolResult",
                "data": {
                    "toolUseId": result.tool_use_id,
                    "toolName": result.tool_name,
                    "result": result.result,
                    "executionTimeMs": result.execution_time_ms,
                    "error": result.error,
                }
            }),
            SessionEvent::Error(error) => json!({
                "type": "error",
                "data": {
                    "message": error.message,
                    "details": error.details,
                    "source": error.source,
                    "type": error.error_type,
                }
            }),
        };
        if !send_json(&out_tx, payload) {
            break;
        }
    }
}

fn require_session(conn: &ConnectionState) -> Result<&Arc<Session>, GatewayError> {
    conn.session.as_ref().ok_or_else(|| {
        GatewayError::SessionLifecycle("no session; send initializeConnection first".to_string())
    })
}

fn send_json(out_tx: &mpsc::UnboundedSender<Message>, value: serde_json::Value) -> bool {
    match serde_json::to_string(&value) {
        Ok(text) => out_tx.send(Message::Text(text.into())).is_ok(),
        Err(err) => {
            warn!("failed to serialize gateway event: {err}");
            false
        }
    }
}

fn send_error(out_tx: &mpsc::UnboundedSender<Message>, error: &GatewayError) {
    let _ = send_json(
        out_tx,
        json!({"type": "error", "data": {"message": error.to_string()}}),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_with_camel_case_tags() {
        let message: ClientMessage = serde_json::from_str(
            r#"{
                "type": "initializeConnection",
                "region": "us-east-1",
                "inferenceConfig": {"maxTokens": 2048, "topP": 0.9, "temperature": 1.0},
                "turnDetectionConfig": {"endpointingSensitivity": "MEDIUM"},
                "enabledTools": ["search_knowledge_base"]
            }"#,
        )
        .unwrap();
        let ClientMessage::InitializeConnection { setup } = message else {
            panic!("expected initializeConnection");
        };
        assert_eq!(setup.region.as_deref(), Some("us-east-1"));
        assert_eq!(setup.inference_config.unwrap().max_tokens, 2048);
        assert_eq!(
            setup.enabled_tools.unwrap(),
            vec!["search_knowledge_base".to_string()]
        );
    }

    #[test]
    fn payload_free_messages_parse() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type": "audioStart"}"#).unwrap(),
            ClientMessage::AudioStart
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type": "stopAudio"}"#).unwrap(),
            ClientMessage::StopAudio
        ));
    }

    #[test]
    fn prompt_start_accepts_partial_payloads() {
        let message: ClientMessage = serde_json::from_str(
            r#"{"type": "promptStart", "voiceId": "kiara", "outputSampleRate": 24000}"#,
        )
        .unwrap();
        let ClientMessage::PromptStart {
            voice_id,
            output_sample_rate,
        } = message
        else {
            panic!("expected promptStart");
        };
        assert_eq!(voice_id.as_deref(), Some("kiara"));
        assert_eq!(output_sample_rate, Some(24_000));

        let message: ClientMessage =
            serde_json::from_str(r#"{"type": "promptStart"}"#).unwrap();
        assert!(matches!(
            message,
            ClientMessage::PromptStart {
                voice_id: None,
                output_sample_rate: None
            }
        ));
    }

    #[test]
    fn start_new_chat_config_is_optional() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type": "startNewChat"}"#).unwrap();
        assert!(matches!(
            message,
            ClientMessage::StartNewChat { config: None }
        ));

        let message: ClientMessage = serde_json::from_str(
            r#"{"type": "startNewChat", "config": {"region": "eu-west-1"}}"#,
        )
        .unwrap();
        let ClientMessage::StartNewChat {
            config: Some(config),
        } = message
        else {
            panic!("expected config");
        };
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "mystery"}"#).is_err());
    }
}
