//! Core orchestration for the sauti voice-assistant gateway.
//!
//! Each client session multiplexes a duplex audio stream against a remote
//! speech-to-speech model service: microphone samples flow upstream through
//! an ordered event queue, synthesized voice and transcripts flow back
//! through a demultiplexer, and tool invocations requested by the model are
//! executed off the stream path with their results interleaved back into the
//! upstream sequence.

pub mod audio;
pub mod bedrock;
pub mod config;
mod demux;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod manager;
pub mod queue;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    EndpointingSensitivity, InferenceConfig, SessionConfig, ToolChoice, TurnDetectionConfig,
    DEFAULT_MODEL_ID, DEFAULT_OUTPUT_SAMPLE_RATE, DEFAULT_REGION, DEFAULT_VOICE_ID,
    INPUT_SAMPLE_RATE, TELEPHONY_OUTPUT_SAMPLE_RATE,
};
pub use error::{GatewayError, Result};
pub use events::{
    DownstreamEvent, ErrorEvent, EventSink, SessionEvent, ToolResultEvent, UpstreamEvent,
};
pub use manager::{
    SessionManager, DISCONNECT_CLEANUP_TIMEOUT, SHUTDOWN_DEADLINE, STOP_CLEANUP_TIMEOUT,
};
pub use session::{Session, SessionState};
pub use transport::{Frame, ModelClientFactory, ModelClientRegistry, ModelServiceClient};
