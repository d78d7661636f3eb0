//! Session lifecycle and the upstream half of the streaming state machine.
//!
//! One session owns one logical prompt. All mutable state sits behind a
//! single short-lived lock (single-writer), hot fields are atomics, and the
//! close signal is a `CancellationToken` observed by every per-session task.

use base64::Engine;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use sauti_tools::ToolRegistry;

use crate::audio::PendingAudioQueue;
use crate::config::{SessionConfig, DEFAULT_OUTPUT_SAMPLE_RATE, DEFAULT_VOICE_ID};
use crate::error::{GatewayError, Result};
use crate::events::upstream::Role;
use crate::events::{ErrorEvent, EventSink, SessionEvent, UpstreamEvent};
use crate::queue::UpstreamQueue;

/// Drain waits on the graceful-close ladder. Bounded by construction; the
/// ladder never blocks on the transport.
pub(crate) const AUDIO_CONTENT_DRAIN_WAIT: Duration = Duration::from_millis(500);
pub(crate) const PROMPT_END_DRAIN_WAIT: Duration = Duration::from_millis(300);
pub(crate) const SESSION_END_DRAIN_WAIT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Initializing,
    Ready,
    Active,
    Closing,
}

/// Last-seen tool invocation awaiting its closing `contentEnd(TOOL)` marker.
#[derive(Debug, Clone)]
pub struct ActiveToolContext {
    pub tool_use_id: String,
    pub tool_name: String,
    pub content: serde_json::Value,
}

struct SessionInner {
    state: SessionState,
    voice_id: String,
    output_sample_rate: u32,
    prompt_start_sent: bool,
    system_prompt_sent: bool,
    audio_content_start_sent: bool,
    audio_content_ended: bool,
    prompt_ended: bool,
    session_end_sent: bool,
    active_tool: Option<ActiveToolContext>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Session {
    id: String,
    prompt_name: String,
    audio_content_id: String,
    config: SessionConfig,
    queue: Arc<UpstreamQueue>,
    pending_audio: Arc<PendingAudioQueue>,
    sink: Arc<dyn EventSink>,
    close: CancellationToken,
    cleanup_in_progress: AtomicBool,
    last_activity: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(config: SessionConfig, sink: Arc<dyn EventSink>) -> Arc<Self> {
        let close = CancellationToken::new();
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            prompt_name: Uuid::new_v4().to_string(),
            audio_content_id: Uuid::new_v4().to_string(),
            config,
            queue: Arc::new(UpstreamQueue::new(close.clone())),
            pending_audio: Arc::new(PendingAudioQueue::new()),
            sink,
            close,
            cleanup_in_progress: AtomicBool::new(false),
            last_activity: AtomicU64::new(now_unix_millis()),
            inner: Mutex::new(SessionInner {
                state: SessionState::Initializing,
                voice_id: DEFAULT_VOICE_ID.to_string(),
                output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
                prompt_start_sent: false,
                system_prompt_sent: false,
                audio_content_start_sent: false,
                audio_content_ended: false,
                prompt_ended: false,
                session_end_sent: false,
                active_tool: None,
                tasks: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    pub fn audio_content_id(&self) -> &str {
        &self.audio_content_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn queue(&self) -> Arc<UpstreamQueue> {
        self.queue.clone()
    }

    pub fn pending_audio(&self) -> &PendingAudioQueue {
        &self.pending_audio
    }

    pub fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    pub fn last_activity_millis(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Stamp activity; called on every upstream enqueue and downstream
    /// receive.
    pub fn touch(&self) {
        self.last_activity.store(now_unix_millis(), Ordering::Relaxed);
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }

    /// Enqueue `sessionStart` followed by `promptStart` (carrying the tool
    /// list). Must be the first protocol step after creation.
    pub fn setup_session_and_prompt_start(
        &self,
        voice_id: Option<String>,
        output_sample_rate: Option<u32>,
        tools: &ToolRegistry,
    ) -> Result<()> {
        let (voice, rate) = {
            let mut inner = self.lock();
            if inner.state != SessionState::Initializing {
                return Err(GatewayError::SessionLifecycle(format!(
                    "cannot start prompt in state {:?}",
                    inner.state
                )));
            }
            if inner.prompt_start_sent {
                return Err(GatewayError::Protocol(
                    "prompt already started for this session".to_string(),
                ));
            }
            if let Some(voice) = voice_id {
                inner.voice_id = voice;
            }
            if let Some(rate) = output_sample_rate {
                inner.output_sample_rate = rate;
            }
            inner.prompt_start_sent = true;
            (inner.voice_id.clone(), inner.output_sample_rate)
        };

        let specs = tools.specs(self.config.enabled_tools.as_ref());
        self.push_event(UpstreamEvent::session_start(
            self.config.inference,
            self.config.turn_detection,
        ));
        self.push_event(UpstreamEvent::prompt_start(
            &self.prompt_name,
            &voice,
            rate,
            specs,
            self.config.tool_choice.clone(),
        ));
        Ok(())
    }

    /// Enqueue the SYSTEM TEXT content triple with a fresh content name.
    pub fn setup_system_prompt(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GatewayError::Configuration(
                "Empty system prompt".to_string(),
            ));
        }
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Initializing {
                return Err(GatewayError::SessionLifecycle(format!(
                    "cannot set system prompt in state {:?}",
                    inner.state
                )));
            }
            if !inner.prompt_start_sent {
                return Err(GatewayError::Protocol(
                    "system prompt requires a started prompt".to_string(),
                ));
            }
            inner.system_prompt_sent = true;
        }

        let content_name = Uuid::new_v4().to_string();
        self.push_event(UpstreamEvent::content_start_text(
            &self.prompt_name,
            &content_name,
            Role::System,
        ));
        self.push_event(UpstreamEvent::text_input(
            &self.prompt_name,
            &content_name,
            text,
        ));
        self.push_event(UpstreamEvent::content_end(&self.prompt_name, &content_name));
        Ok(())
    }

    /// Enqueue the user-audio `contentStart` and move to `Ready`. The full
    /// preamble is now queued; streaming may be initiated.
    pub fn setup_start_audio(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Initializing {
                return Err(GatewayError::SessionLifecycle(format!(
                    "cannot start audio in state {:?}",
                    inner.state
                )));
            }
            if !inner.prompt_start_sent {
                return Err(GatewayError::Protocol(
                    "audio start requires a started prompt".to_string(),
                ));
            }
            if !inner.system_prompt_sent {
                return Err(GatewayError::Protocol(
                    "audio start requires a system prompt".to_string(),
                ));
            }
            inner.audio_content_start_sent = true;
            inner.state = SessionState::Ready;
        }

        self.push_event(UpstreamEvent::content_start_audio(
            &self.prompt_name,
            &self.audio_content_id,
        ));
        Ok(())
    }

    /// `Ready` -> `Active` transition taken exactly once, when the duplex
    /// stream is bound.
    pub(crate) fn mark_streaming(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Ready {
            return Err(GatewayError::SessionLifecycle(format!(
                "cannot initiate streaming in state {:?}",
                inner.state
            )));
        }
        inner.state = SessionState::Active;
        Ok(())
    }

    pub(crate) fn add_task(&self, task: JoinHandle<()>) {
        self.lock().tasks.push(task);
    }

    /// Buffer one raw PCM16 chunk from the client. Ignored outside `Active`;
    /// audio racing a shutdown is expected, not an error.
    pub fn stream_audio(&self, chunk: Vec<u8>) {
        if self.state() != SessionState::Active {
            debug!(session_id = %self.id, "dropping audio chunk outside Active state");
            return;
        }
        self.pending_audio.push(chunk);
        self.touch();
    }

    /// Serialize one buffered chunk as an `audioInput` event. Called only by
    /// the audio drainer.
    pub(crate) fn enqueue_audio_frame(&self, chunk: &[u8]) {
        {
            let inner = self.lock();
            if inner.state != SessionState::Active
                || !inner.audio_content_start_sent
                || inner.audio_content_ended
            {
                return;
            }
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(chunk);
        self.push_event(UpstreamEvent::audio_input(
            &self.prompt_name,
            &self.audio_content_id,
            encoded,
        ));
    }

    /// Enqueue a fresh USER TEXT content triple.
    pub fn send_text_input(&self, text: &str) -> Result<()> {
        {
            let inner = self.lock();
            if !matches!(inner.state, SessionState::Ready | SessionState::Active) {
                return Err(GatewayError::SessionLifecycle(format!(
                    "cannot send text input in state {:?}",
                    inner.state
                )));
            }
        }
        let content_name = Uuid::new_v4().to_string();
        self.push_event(UpstreamEvent::content_start_text(
            &self.prompt_name,
            &content_name,
            Role::User,
        ));
        self.push_event(UpstreamEvent::text_input(
            &self.prompt_name,
            &content_name,
            text,
        ));
        self.push_event(UpstreamEvent::content_end(&self.prompt_name, &content_name));
        Ok(())
    }

    /// Enqueue a tool-result event on behalf of the dispatcher. Permitted
    /// while `Active`; silently skipped otherwise.
    pub(crate) fn enqueue_tool_event(&self, event: UpstreamEvent) {
        if self.state() != SessionState::Active {
            return;
        }
        self.push_event(event);
    }

    pub(crate) fn note_tool_use(&self, context: ActiveToolContext) {
        self.lock().active_tool = Some(context);
    }

    pub(crate) fn take_active_tool(&self) -> Option<ActiveToolContext> {
        self.lock().active_tool.take()
    }

    /// First rung of the graceful-close ladder: close the user-audio content
    /// block (if it was opened) and give the serializer time to drain.
    pub async fn end_audio_content(&self) {
        let should_send = {
            let mut inner = self.lock();
            if inner.audio_content_start_sent && !inner.audio_content_ended {
                inner.audio_content_ended = true;
                true
            } else {
                false
            }
        };
        if should_send {
            self.push_terminal(UpstreamEvent::content_end(
                &self.prompt_name,
                &self.audio_content_id,
            ));
            tokio::time::sleep(AUDIO_CONTENT_DRAIN_WAIT).await;
        }
    }

    /// Second rung: close the prompt.
    pub async fn end_prompt(&self) {
        let should_send = {
            let mut inner = self.lock();
            if inner.prompt_start_sent && !inner.prompt_ended {
                inner.prompt_ended = true;
                true
            } else {
                false
            }
        };
        if should_send {
            self.push_terminal(UpstreamEvent::prompt_end(&self.prompt_name));
            tokio::time::sleep(PROMPT_END_DRAIN_WAIT).await;
        }
    }

    /// Final rung: emit `sessionEnd`, wait for the drain, then fire the
    /// close signal so every per-session task winds down.
    pub async fn send_session_end(&self) {
        {
            let mut inner = self.lock();
            if inner.session_end_sent {
                return;
            }
            inner.session_end_sent = true;
            inner.state = SessionState::Closing;
        }
        self.push_terminal(UpstreamEvent::session_end());
        tokio::time::sleep(SESSION_END_DRAIN_WAIT).await;
        self.close.cancel();
        self.lock().state = SessionState::Closed;
    }

    /// Setup failure: park the session in `Closing` and surface the error.
    pub fn fail_setup(&self, error: &GatewayError) {
        warn!(session_id = %self.id, %error, "session setup failed");
        self.lock().state = SessionState::Closing;
        self.emit(SessionEvent::Error(ErrorEvent::new(error.to_string())));
    }

    /// Re-entry guard for close sequences. Returns `false` when another
    /// cleanup already owns the session.
    pub(crate) fn begin_cleanup(&self) -> bool {
        !self.cleanup_in_progress.swap(true, Ordering::SeqCst)
    }

    /// Immediate teardown: mark closed, fire the close signal, and abort any
    /// per-session task still running. Safe to call repeatedly.
    pub(crate) fn abort_and_close(&self) {
        let tasks = {
            let mut inner = self.lock();
            inner.state = SessionState::Closed;
            std::mem::take(&mut inner.tasks)
        };
        self.close.cancel();
        for task in tasks {
            task.abort();
        }
    }

    fn push_event(&self, event: UpstreamEvent) {
        let state = self.state();
        if matches!(state, SessionState::Closing | SessionState::Closed) {
            debug!(session_id = %self.id, kind = event.kind(), "dropping event for closing session");
            return;
        }
        self.queue.push(event);
        self.touch();
    }

    /// The terminal `contentEnd`/`promptEnd`/`sessionEnd` trio may still be
    /// enqueued once `Closing` is entered.
    fn push_terminal(&self, event: UpstreamEvent) {
        self.queue.push(event);
        self.touch();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session lock poisoned")
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: SessionState) {
        self.lock().state = state;
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity_millis(&self, millis: u64) {
        self.last_activity.store(millis, Ordering::Relaxed);
    }
}

pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
