//! Duplex transport to the speech-to-speech model service.
//!
//! The SDK behind the duplex stream is opaque to the orchestrator: the trait
//! below only exchanges serialized `{event: ...}` frames. Production uses the
//! Bedrock implementation; tests substitute a loopback client.

use async_trait::async_trait;
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Server-wide cap on concurrent duplex streams.
pub const MAX_CONCURRENT_STREAMS: usize = 20;
/// Per-region-client cap on concurrent duplex streams.
pub const MAX_STREAMS_PER_REGION: usize = 10;

/// One serialized protocol event on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
}

pub type InputFrameStream = Pin<Box<dyn Stream<Item = Frame> + Send + Sync>>;
pub type OutputFrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

#[async_trait]
pub trait ModelServiceClient: Send + Sync {
    /// Open a bidirectional stream: the model service consumes `input` and
    /// the returned stream yields its response frames.
    async fn open_duplex(&self, input: InputFrameStream) -> Result<OutputFrameStream>;
}

/// Creates region-scoped model clients on first use.
#[async_trait]
pub trait ModelClientFactory: Send + Sync {
    async fn create(&self, region: &str) -> Result<Arc<dyn ModelServiceClient>>;
}

struct RegionClient {
    client: Arc<dyn ModelServiceClient>,
    permits: Arc<Semaphore>,
}

/// Process-wide registry of model clients keyed by region. Clients are
/// created lazily and retained; stream concurrency is capped globally and
/// per region.
pub struct ModelClientRegistry {
    factory: Arc<dyn ModelClientFactory>,
    clients: RwLock<HashMap<String, RegionClient>>,
    global_permits: Arc<Semaphore>,
}

/// Capacity held for the life of one duplex stream.
pub struct StreamPermits {
    _global: OwnedSemaphorePermit,
    _region: OwnedSemaphorePermit,
}

impl ModelClientRegistry {
    pub fn new(factory: Arc<dyn ModelClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
            global_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_STREAMS)),
        }
    }

    pub async fn open_duplex(
        &self,
        region: &str,
        input: InputFrameStream,
    ) -> Result<(OutputFrameStream, StreamPermits)> {
        let (client, region_permits) = self.client_for(region).await?;

        let global = self
            .global_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Resource("stream limiter closed".to_string()))?;
        let regional = region_permits
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Resource("region stream limiter closed".to_string()))?;

        let output = client.open_duplex(input).await?;
        Ok((
            output,
            StreamPermits {
                _global: global,
                _region: regional,
            },
        ))
    }

    /// Regions with an instantiated client, for the health endpoint.
    pub async fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.clients.read().await.keys().cloned().collect();
        regions.sort();
        regions
    }

    async fn client_for(
        &self,
        region: &str,
    ) -> Result<(Arc<dyn ModelServiceClient>, Arc<Semaphore>)> {
        if let Some(entry) = self.clients.read().await.get(region) {
            return Ok((entry.client.clone(), entry.permits.clone()));
        }

        debug!(region, "creating model client");
        let client = self.factory.create(region).await?;
        let mut clients = self.clients.write().await;
        let entry = clients
            .entry(region.to_string())
            .or_insert_with(|| RegionClient {
                client,
                permits: Arc::new(Semaphore::new(MAX_STREAMS_PER_REGION)),
            });
        Ok((entry.client.clone(), entry.permits.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullClient;

    #[async_trait]
    impl ModelServiceClient for NullClient {
        async fn open_duplex(&self, input: InputFrameStream) -> Result<OutputFrameStream> {
            drop(input);
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    struct CountingFactory {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ModelClientFactory for CountingFactory {
        async fn create(&self, _region: &str) -> Result<Arc<dyn ModelServiceClient>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullClient))
        }
    }

    #[tokio::test]
    async fn clients_are_created_lazily_and_retained() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let registry = ModelClientRegistry::new(factory.clone());
        assert!(registry.regions().await.is_empty());

        let input: InputFrameStream = Box::pin(futures::stream::empty());
        let (mut output, permits) = registry.open_duplex("us-east-1", input).await.unwrap();
        assert!(output.next().await.is_none());
        drop(permits);

        let input: InputFrameStream = Box::pin(futures::stream::empty());
        let _ = registry.open_duplex("us-east-1", input).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.regions().await, vec!["us-east-1".to_string()]);
    }
}
