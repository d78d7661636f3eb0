//! Audio input pipeline: a bounded drop-oldest buffer between the client
//! socket and the upstream serializer.
//!
//! The socket receive rate is decoupled from serialization so a burst of
//! microphone frames cannot grow memory without bound; under overflow the
//! oldest speech is dropped first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

use crate::session::Session;

/// Maximum buffered chunks per session before drop-oldest kicks in.
pub const PENDING_AUDIO_CAPACITY: usize = 200;
/// Chunks serialized per scheduling slice before yielding to other tasks.
pub const DRAIN_BATCH_SIZE: usize = 5;

#[derive(Default)]
pub struct PendingAudioQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl PendingAudioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a raw audio chunk, discarding the oldest one at capacity.
    pub fn push(&self, chunk: Vec<u8>) {
        {
            let mut inner = self.inner.lock().expect("audio queue lock poisoned");
            if inner.len() >= PENDING_AUDIO_CAPACITY {
                inner.pop_front();
                debug!("pending audio queue full, dropped oldest chunk");
            }
            inner.push_back(chunk);
        }
        self.notify.notify_one();
    }

    pub fn pop_batch(&self, max: usize) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().expect("audio queue lock poisoned");
        let take = inner.len().min(max);
        inner.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("audio queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Single consumer task draining the pending queue into the upstream
/// serializer in small batches, yielding between batches so one chatty
/// session cannot starve the others.
pub(crate) async fn run_drainer(session: Arc<Session>) {
    loop {
        let batch = session.pending_audio().pop_batch(DRAIN_BATCH_SIZE);
        if batch.is_empty() {
            tokio::select! {
                _ = session.close_token().cancelled() => break,
                _ = session.pending_audio().notified() => continue,
            }
        }
        for chunk in batch {
            session.enqueue_audio_frame(&chunk);
        }
        tokio::task::yield_now().await;
    }
}
