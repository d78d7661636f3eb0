//! Session registry, streaming initiation, graceful shutdown, and the
//! inactivity sweeper.
//!
//! The manager is the only owner of session indices: sessions are removed in
//! a single step so late callbacks that look a session up observe removal
//! and short-circuit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sauti_tools::ToolRegistry;

use crate::audio;
use crate::config::SessionConfig;
use crate::demux;
use crate::error::Result;
use crate::events::{ErrorEvent, EventSink, SessionEvent};
use crate::queue;
use crate::session::{now_unix_millis, Session, SessionState};
use crate::transport::{ModelClientFactory, ModelClientRegistry};

/// Sweep cadence for idle sessions.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(60);
/// A session untouched for this long is force-closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Graceful-close budget on an explicit client stop.
pub const STOP_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Graceful-close budget when the socket disconnects.
pub const DISCONNECT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(3);
/// Process-shutdown budget for closing every session in parallel.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    clients: ModelClientRegistry,
    tools: Arc<ToolRegistry>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn ModelClientFactory>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clients: ModelClientRegistry::new(factory),
            tools,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub async fn create_session(
        &self,
        config: SessionConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Session>> {
        let session = Session::new(config, sink);
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.id()) {
            return Err(crate::error::GatewayError::SessionLifecycle(format!(
                "duplicate session id {}",
                session.id()
            )));
        }
        sessions.insert(session.id().to_string(), session.clone());
        debug!(session_id = %session.id(), "session created");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Regions with an instantiated model client.
    pub async fn regions(&self) -> Vec<String> {
        self.clients.regions().await
    }

    /// Open the duplex stream to the model service and start the two
    /// per-session loops: the downstream demultiplexer and the audio
    /// drainer. Requires the full preamble to be queued (state `Ready`).
    pub async fn initiate_streaming(&self, session: &Arc<Session>) -> Result<()> {
        session.mark_streaming()?;

        let input = queue::frame_stream(session.queue());
        let opened = self
            .clients
            .open_duplex(session.config().region(), input)
            .await;
        let (output, permits) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                session.fail_setup(&err);
                return Err(err);
            }
        };

        let demux_task = tokio::spawn(demux::run(
            session.clone(),
            self.tools.clone(),
            output,
            permits,
        ));
        let drain_task = tokio::spawn(audio::run_drainer(session.clone()));
        session.add_task(demux_task);
        session.add_task(drain_task);
        debug!(session_id = %session.id(), region = session.config().region(), "streaming initiated");
        Ok(())
    }

    /// Text input while still `Ready` lazily starts streaming; such a
    /// session may never carry a user-audio content block.
    pub async fn send_text_input(&self, session: &Arc<Session>, text: &str) -> Result<()> {
        session.send_text_input(text)?;
        if session.state() == SessionState::Ready {
            self.initiate_streaming(session).await?;
        }
        Ok(())
    }

    /// Graceful close: `endAudioContent -> endPrompt -> sendSessionEnd`
    /// bounded by `timeout`; on expiry or re-entry the session is
    /// force-closed. Always removes the session from the indices. Returns
    /// `false` when the ladder did not finish cleanly.
    pub async fn close_gracefully(&self, id: &str, timeout: Duration) -> bool {
        let Some(session) = self.get(id).await else {
            return true;
        };
        if !session.begin_cleanup() {
            // Another close sequence owns this session.
            return true;
        }

        let ladder = async {
            session.end_audio_content().await;
            session.end_prompt().await;
            session.send_session_end().await;
        };
        let clean = tokio::time::timeout(timeout, ladder).await.is_ok();
        if !clean {
            warn!(session_id = %id, "graceful close timed out, forcing");
            session.abort_and_close();
        }

        self.sessions.write().await.remove(id);
        debug!(session_id = %id, clean, "session closed");
        clean
    }

    /// Immediate close with no upstream emission. Idempotent: the second
    /// call for the same id is a no-op returning `false`.
    pub async fn force_close(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };
        session.begin_cleanup();
        session.abort_and_close();
        debug!(session_id = %id, "session force-closed");
        true
    }

    /// One sweep pass: force-close every session idle past the threshold.
    /// Returns how many sessions were closed.
    pub async fn sweep_idle(&self) -> usize {
        let now = now_unix_millis();
        let threshold = IDLE_TIMEOUT.as_millis() as u64;
        let idle: Vec<(String, Arc<Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| {
                now.saturating_sub(session.last_activity_millis()) > threshold
            })
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();

        for (id, session) in &idle {
            warn!(session_id = %id, "force-closing idle session");
            session.emit(SessionEvent::Error(ErrorEvent::new(
                "Session closed due to inactivity",
            )));
            self.force_close(id).await;
        }
        idle.len()
    }

    /// Background sweeper task; one per process.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = manager.sweep_idle().await;
                        if swept > 0 {
                            info!(swept, "inactivity sweep closed sessions");
                        }
                    }
                }
            }
        })
    }

    /// Process shutdown: close every session gracefully in parallel under
    /// one deadline; stragglers are force-closed. Returns `true` when every
    /// session closed cleanly in time.
    pub async fn shutdown_all(&self, deadline: Duration) -> bool {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        if ids.is_empty() {
            return true;
        }
        info!(count = ids.len(), "closing all sessions");

        let closes = ids.iter().map(|id| self.close_gracefully(id, deadline));
        match tokio::time::timeout(deadline, futures::future::join_all(closes)).await {
            Ok(results) => results.into_iter().all(|clean| clean),
            Err(_) => {
                warn!("shutdown deadline expired, force-closing remaining sessions");
                for id in &ids {
                    self.force_close(id).await;
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InferenceConfig, SessionConfig};
    use crate::testing::{EchoTool, LoopbackFactory, RecordingSink};
    use crate::transport::Frame;
    use serde_json::{json, Value};
    use std::collections::HashSet;

    fn manager_with(factory: Arc<LoopbackFactory>) -> Arc<SessionManager> {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        Arc::new(SessionManager::new(factory, Arc::new(tools)))
    }

    fn envelope_kind(frame: &Frame) -> String {
        let value: Value = serde_json::from_slice(&frame.bytes).unwrap();
        value["event"]
            .as_object()
            .and_then(|o| o.keys().next().cloned())
            .unwrap_or_default()
    }

    async fn setup_ready_session(
        manager: &SessionManager,
        sink: Arc<RecordingSink>,
    ) -> Arc<Session> {
        let config = SessionConfig {
            inference: InferenceConfig::default(),
            enabled_tools: Some(HashSet::from(["echo".to_string()])),
            ..Default::default()
        };
        let session = manager.create_session(config, sink).await.unwrap();
        session
            .setup_session_and_prompt_start(Some("kiara".to_string()), Some(24_000), manager.tools())
            .unwrap();
        session
            .setup_system_prompt("You are a helpful assistant.")
            .unwrap();
        session.setup_start_audio().unwrap();
        session
    }

    #[tokio::test]
    async fn happy_path_upstream_order_is_well_formed() {
        let factory = LoopbackFactory::new(vec![]);
        let manager = manager_with(factory.clone());
        let sink = RecordingSink::new();
        let session = setup_ready_session(&manager, sink).await;

        manager.initiate_streaming(&session).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);

        // Stream a little audio, then stop.
        for _ in 0..3 {
            session.stream_audio(vec![0u8; 640]);
        }
        // Give the drainer a chance to serialize the chunks.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.close_gracefully(session.id(), STOP_CLEANUP_TIMEOUT).await);
        assert!(manager.get(session.id()).await.is_none());

        // Let the loopback writer drain the terminal events.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let kinds: Vec<String> = factory.sent_frames().iter().map(envelope_kind).collect();
        assert_eq!(kinds.first().unwrap(), "sessionStart");
        assert_eq!(kinds.get(1).unwrap(), "promptStart");
        assert_eq!(kinds.last().unwrap(), "sessionEnd");
        assert_eq!(kinds.get(kinds.len() - 2).unwrap(), "promptEnd");
        assert!(kinds.iter().filter(|k| *k == "audioInput").count() >= 3);
        // promptStart precedes every contentStart.
        let prompt_start = kinds.iter().position(|k| k == "promptStart").unwrap();
        let first_content = kinds.iter().position(|k| k == "contentStart").unwrap();
        assert!(prompt_start < first_content);
        // sessionStart is first and sessionEnd is unique.
        assert_eq!(kinds.iter().filter(|k| *k == "sessionStart").count(), 1);
        assert_eq!(kinds.iter().filter(|k| *k == "sessionEnd").count(), 1);
    }

    #[tokio::test]
    async fn tool_use_round_trip_reaches_both_directions() {
        let factory = LoopbackFactory::new(vec![
            json!({"event": {"toolUse": {
                "toolUseId": "t-1",
                "toolName": "echo",
                "content": "{\"query\":\"borewell pump\"}"
            }}}),
            json!({"event": {"contentEnd": {"type": "TOOL", "stopReason": "TOOL_USE"}}}),
        ]);
        let manager = manager_with(factory.clone());
        let sink = RecordingSink::new();
        let session = setup_ready_session(&manager, sink.clone()).await;
        manager.initiate_streaming(&session).await.unwrap();

        // Let the demux consume the scripted frames and the tool finish.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let local = sink.events.lock().unwrap().clone();
        let tool_result = local
            .iter()
            .find_map(|e| match e {
                SessionEvent::ToolResult(r) => Some(r.clone()),
                _ => None,
            })
            .expect("tool result event");
        assert_eq!(tool_result.tool_use_id, "t-1");
        assert!(!tool_result.error);
        assert_eq!(tool_result.result, json!({"query": "borewell pump"}));

        let kinds: Vec<String> = factory.sent_frames().iter().map(envelope_kind).collect();
        assert!(kinds.iter().any(|k| k == "toolResult"));

        // The upstream toolResult references the originating toolUseId via
        // its contentStart configuration.
        let frames = factory.sent_frames();
        let tool_start = frames
            .iter()
            .map(|f| serde_json::from_slice::<Value>(&f.bytes).unwrap())
            .find(|v| v["event"]["contentStart"]["type"] == "TOOL")
            .expect("tool contentStart");
        assert_eq!(
            tool_start["event"]["contentStart"]["toolResultInputConfiguration"]["toolUseId"],
            "t-1"
        );

        manager.force_close(session.id()).await;
    }

    #[tokio::test]
    async fn barge_in_marker_reaches_the_sink_before_the_text() {
        let factory = LoopbackFactory::new(vec![
            json!({"event": {"textOutput": {"role": "ASSISTANT", "content": "{\"interrupted\":true}"}}}),
            json!({"event": {"contentEnd": {"stopReason": "INTERRUPTED"}}}),
        ]);
        let manager = manager_with(factory.clone());
        let sink = RecordingSink::new();
        let session = setup_ready_session(&manager, sink.clone()).await;
        manager.initiate_streaming(&session).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let local = sink.events.lock().unwrap().clone();
        let barge = local
            .iter()
            .position(|e| matches!(e, SessionEvent::BargeIn))
            .expect("barge-in event");
        let text = local
            .iter()
            .position(|e| {
                matches!(
                    e,
                    SessionEvent::Downstream(crate::events::DownstreamEvent::TextOutput(_))
                )
            })
            .expect("text output event");
        assert!(barge < text);
        // The session stays Active through a barge-in.
        assert_eq!(session.state(), SessionState::Active);

        manager.force_close(session.id()).await;
    }

    #[tokio::test]
    async fn force_close_is_idempotent_and_clears_indices() {
        let factory = LoopbackFactory::new(vec![]);
        let manager = manager_with(factory);
        let sink = RecordingSink::new();
        let session = setup_ready_session(&manager, sink).await;
        let id = session.id().to_string();

        assert!(manager.force_close(&id).await);
        assert!(!manager.force_close(&id).await);
        assert!(manager.get(&id).await.is_none());
        assert_eq!(manager.active_count().await, 0);
        assert!(session.close_token().is_cancelled());
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let factory = LoopbackFactory::new(vec![]);
        let manager = manager_with(factory);
        let sink = RecordingSink::new();
        let session = setup_ready_session(&manager, sink.clone()).await;

        assert_eq!(manager.sweep_idle().await, 0);

        let stale = now_unix_millis() - IDLE_TIMEOUT.as_millis() as u64 - 1_000;
        session.set_last_activity_millis(stale);
        assert_eq!(manager.sweep_idle().await, 1);
        assert!(manager.get(session.id()).await.is_none());

        // The sink saw the inactivity error.
        let local = sink.events.lock().unwrap();
        assert!(local
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(err) if err.message.contains("inactivity"))));
    }

    #[tokio::test]
    async fn shutdown_all_closes_every_session() {
        let factory = LoopbackFactory::new(vec![]);
        let manager = manager_with(factory);
        for _ in 0..3 {
            let sink = RecordingSink::new();
            let session = setup_ready_session(&manager, sink).await;
            manager.initiate_streaming(&session).await.unwrap();
        }
        assert_eq!(manager.active_count().await, 3);

        assert!(manager.shutdown_all(SHUTDOWN_DEADLINE).await);
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn text_input_while_ready_lazily_starts_streaming() {
        let factory = LoopbackFactory::new(vec![]);
        let manager = manager_with(factory.clone());
        let sink = RecordingSink::new();
        let session = setup_ready_session(&manager, sink).await;
        assert_eq!(session.state(), SessionState::Ready);

        manager
            .send_text_input(&session, "what pumps do you sell?")
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Active);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let kinds: Vec<String> = factory.sent_frames().iter().map(envelope_kind).collect();
        assert!(kinds.iter().any(|k| k == "textInput"));

        manager.force_close(session.id()).await;
    }
}
