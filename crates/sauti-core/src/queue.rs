//! Per-session ordered FIFO of upstream protocol events.
//!
//! The queue is the only writer-side hand-off point: producers append
//! already-constructed events, and a single pull iterator feeds the model
//! service's duplex writer. Waiting for the next event races the queue's
//! wake signal against the session's close signal and yields a tagged
//! outcome instead of throwing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::events::UpstreamEvent;
use crate::transport::InputFrameStream;

pub struct UpstreamQueue {
    inner: Mutex<VecDeque<UpstreamEvent>>,
    notify: Notify,
    closed: CancellationToken,
}

impl UpstreamQueue {
    pub fn new(closed: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed,
        }
    }

    /// Append an event. Returns `false` (dropping the event silently) once
    /// the close signal has fired.
    pub fn push(&self, event: UpstreamEvent) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.inner
            .lock()
            .expect("upstream queue lock poisoned")
            .push_back(event);
        self.notify.notify_one();
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("upstream queue lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next event in strict FIFO order. Suspends until the queue is
    /// non-empty; once the close signal fires, drains what is already queued
    /// and then returns `None`.
    pub async fn next(&self) -> Option<UpstreamEvent> {
        loop {
            if let Some(event) = self
                .inner
                .lock()
                .expect("upstream queue lock poisoned")
                .pop_front()
            {
                return Some(event);
            }
            if self.closed.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.closed.cancelled() => {}
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn drain(&self) -> Vec<UpstreamEvent> {
        self.inner
            .lock()
            .expect("upstream queue lock poisoned")
            .drain(..)
            .collect()
    }
}

/// Adapt the queue into the frame stream the transport writes to the model
/// service. The serializer has no concurrency, so events are never
/// reordered.
pub fn frame_stream(queue: Arc<UpstreamQueue>) -> InputFrameStream {
    Box::pin(async_stream::stream! {
        while let Some(event) = queue.next().await {
            yield event.to_frame();
        }
    })
}
