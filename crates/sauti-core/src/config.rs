//! Default inference, audio, and turn-detection settings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MODEL_ID: &str = "amazon.nova-sonic-v1:0";
pub const DEFAULT_VOICE_ID: &str = "matthew";

/// Microphone input is always PCM16 little-endian mono at 16 kHz.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Browser playback default.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Telephony callers negotiate this lower output rate instead.
pub const TELEPHONY_OUTPUT_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointingSensitivity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDetectionConfig {
    pub endpointing_sensitivity: EndpointingSensitivity,
}

/// How the model is allowed to pick tools. Serializes to the wire shapes
/// `{"auto":{}}`, `{"any":{}}`, and `{"tool":{"name":...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolChoice {
    Auto {},
    Any {},
    Tool { name: String },
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Auto {}
    }
}

/// Per-session configuration fixed at creation time. Voice and output rate
/// may still be overridden by the client's `promptStart` message.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub region: Option<String>,
    pub inference: InferenceConfig,
    pub turn_detection: Option<TurnDetectionConfig>,
    pub tool_choice: ToolChoice,
    pub enabled_tools: Option<HashSet<String>>,
}

impl SessionConfig {
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}
