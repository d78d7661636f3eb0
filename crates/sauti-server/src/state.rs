//! Shared application state.

use sauti_core::SessionManager;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    /// Session registry and orchestrator entry point.
    pub sessions: Arc<SessionManager>,
    /// Open websocket connections, for the health endpoint.
    pub socket_connections: Arc<AtomicUsize>,
    /// Fired once on process shutdown; stops background tasks.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            socket_connections: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }
}
