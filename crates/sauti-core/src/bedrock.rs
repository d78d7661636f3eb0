//! Bedrock Runtime implementation of the model-service transport.
//!
//! Wraps `InvokeModelWithBidirectionalStream`: the upstream frame stream is
//! adapted into the SDK's event-stream sender and response chunks are
//! unwrapped back into raw frames.

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::{
    BidirectionalInputPayloadPart, InvokeModelWithBidirectionalStreamInput,
    InvokeModelWithBidirectionalStreamOutput,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::transport::{
    Frame, InputFrameStream, ModelClientFactory, ModelServiceClient, OutputFrameStream,
};

/// The model service drops connections held longer than its own ceiling;
/// these bound one request/session on our side.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

pub struct BedrockModelClient {
    client: aws_sdk_bedrockruntime::Client,
    model_id: String,
}

impl BedrockModelClient {
    pub async fn connect(region: &str, model_id: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(CONNECT_TIMEOUT)
                    .operation_timeout(OPERATION_TIMEOUT)
                    .build(),
            )
            .load()
            .await;
        debug!(region, model_id, "bedrock runtime client ready");
        Self {
            client: aws_sdk_bedrockruntime::Client::new(&config),
            model_id: model_id.to_string(),
        }
    }
}

#[async_trait]
impl ModelServiceClient for BedrockModelClient {
    async fn open_duplex(&self, input: InputFrameStream) -> Result<OutputFrameStream> {
        let input_stream = input.map(|frame| {
            Ok(InvokeModelWithBidirectionalStreamInput::Chunk(
                BidirectionalInputPayloadPart::builder()
                    .bytes(Blob::new(frame.bytes))
                    .build(),
            ))
        });

        let output = self
            .client
            .invoke_model_with_bidirectional_stream()
            .model_id(&self.model_id)
            .body(input_stream.into())
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{}", DisplayErrorContext(&e))))?;

        let mut receiver = output.body;
        let frames = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(Some(InvokeModelWithBidirectionalStreamOutput::Chunk(part))) => {
                        if let Some(blob) = part.bytes {
                            yield Ok(Frame { bytes: blob.into_inner() });
                        }
                    }
                    Ok(Some(_)) => {
                        // Future event-stream variants; nothing to surface.
                        continue;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("bedrock response stream error: {}", DisplayErrorContext(&err));
                        yield Err(GatewayError::Transport(format!(
                            "{}",
                            DisplayErrorContext(&err)
                        )));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(frames))
    }
}

/// Creates one Bedrock client per region on first use.
pub struct BedrockClientFactory {
    model_id: String,
}

impl BedrockClientFactory {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl ModelClientFactory for BedrockClientFactory {
    async fn create(&self, region: &str) -> Result<Arc<dyn ModelServiceClient>> {
        Ok(Arc::new(
            BedrockModelClient::connect(region, &self.model_id).await,
        ))
    }
}
