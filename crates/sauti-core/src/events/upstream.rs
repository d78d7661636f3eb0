//! Upstream protocol events, serialized as `{"event":{"<kind>":{...}}}`
//! JSON envelopes in UTF-8.

use serde::Serialize;

use crate::config::{InferenceConfig, ToolChoice, TurnDetectionConfig, INPUT_SAMPLE_RATE};
use crate::transport::Frame;
use sauti_tools::ToolSpec;

pub const TEXT_MEDIA_TYPE: &str = "text/plain";
pub const AUDIO_MEDIA_TYPE: &str = "audio/lpcm";
pub const TOOL_MEDIA_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Text,
    Audio,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfiguration {
    pub media_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfiguration {
    pub media_type: &'static str,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub voice_id: String,
    pub encoding: &'static str,
    pub audio_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfiguration {
    pub media_type: &'static str,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub audio_type: &'static str,
    pub encoding: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfiguration {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub text_input_configuration: MediaConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    pub json: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecPayload {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecEntry {
    pub tool_spec: ToolSpecPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfiguration {
    pub tools: Vec<ToolSpecEntry>,
    pub tool_choice: ToolChoice,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub inference_configuration: InferenceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection_configuration: Option<TurnDetectionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: MediaConfiguration,
    pub audio_output_configuration: AudioOutputConfiguration,
    pub tool_use_output_configuration: MediaConfiguration,
    pub tool_configuration: ToolConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<MediaConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfiguration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub prompt_name: String,
    pub content_name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnd {
    pub prompt_name: String,
    pub content_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEnd {
    pub prompt_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEnd {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpstreamEvent {
    SessionStart(SessionStart),
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    TextInput(ContentPayload),
    AudioInput(ContentPayload),
    ToolResult(ContentPayload),
    ContentEnd(ContentEnd),
    PromptEnd(PromptEnd),
    SessionEnd(SessionEnd),
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a UpstreamEvent,
}

impl UpstreamEvent {
    pub fn session_start(
        inference: InferenceConfig,
        turn_detection: Option<TurnDetectionConfig>,
    ) -> Self {
        UpstreamEvent::SessionStart(SessionStart {
            inference_configuration: inference,
            turn_detection_configuration: turn_detection,
        })
    }

    pub fn prompt_start(
        prompt_name: &str,
        voice_id: &str,
        output_sample_rate: u32,
        tools: Vec<ToolSpec>,
        tool_choice: ToolChoice,
    ) -> Self {
        let tools = tools
            .into_iter()
            .map(|spec| ToolSpecEntry {
                tool_spec: ToolSpecPayload {
                    name: spec.name,
                    description: spec.description,
                    input_schema: InputSchema { json: spec.schema },
                },
            })
            .collect();

        UpstreamEvent::PromptStart(PromptStart {
            prompt_name: prompt_name.to_string(),
            text_output_configuration: MediaConfiguration {
                media_type: TEXT_MEDIA_TYPE,
            },
            audio_output_configuration: AudioOutputConfiguration {
                media_type: AUDIO_MEDIA_TYPE,
                sample_rate_hertz: output_sample_rate,
                sample_size_bits: 16,
                channel_count: 1,
                voice_id: voice_id.to_string(),
                encoding: "base64",
                audio_type: "SPEECH",
            },
            tool_use_output_configuration: MediaConfiguration {
                media_type: TOOL_MEDIA_TYPE,
            },
            tool_configuration: ToolConfiguration { tools, tool_choice },
        })
    }

    pub fn content_start_text(prompt_name: &str, content_name: &str, role: Role) -> Self {
        UpstreamEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Text,
            role: Some(role),
            interactive: Some(true),
            text_input_configuration: Some(MediaConfiguration {
                media_type: TEXT_MEDIA_TYPE,
            }),
            audio_input_configuration: None,
            tool_result_input_configuration: None,
        })
    }

    pub fn content_start_audio(prompt_name: &str, content_name: &str) -> Self {
        UpstreamEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Audio,
            role: Some(Role::User),
            interactive: Some(true),
            text_input_configuration: None,
            audio_input_configuration: Some(AudioInputConfiguration {
                media_type: AUDIO_MEDIA_TYPE,
                sample_rate_hertz: INPUT_SAMPLE_RATE,
                sample_size_bits: 16,
                channel_count: 1,
                audio_type: "SPEECH",
                encoding: "base64",
            }),
            tool_result_input_configuration: None,
        })
    }

    pub fn content_start_tool(prompt_name: &str, content_name: &str, tool_use_id: &str) -> Self {
        UpstreamEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Tool,
            role: Some(Role::Tool),
            interactive: Some(false),
            text_input_configuration: None,
            audio_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfiguration {
                tool_use_id: tool_use_id.to_string(),
                content_type: ContentType::Text,
                text_input_configuration: MediaConfiguration {
                    media_type: TEXT_MEDIA_TYPE,
                },
            }),
        })
    }

    pub fn text_input(prompt_name: &str, content_name: &str, content: &str) -> Self {
        UpstreamEvent::TextInput(ContentPayload {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: content.to_string(),
        })
    }

    pub fn audio_input(prompt_name: &str, content_name: &str, base64_content: String) -> Self {
        UpstreamEvent::AudioInput(ContentPayload {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: base64_content,
        })
    }

    pub fn tool_result(prompt_name: &str, content_name: &str, content: String) -> Self {
        UpstreamEvent::ToolResult(ContentPayload {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content,
        })
    }

    pub fn content_end(prompt_name: &str, content_name: &str) -> Self {
        UpstreamEvent::ContentEnd(ContentEnd {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
        })
    }

    pub fn prompt_end(prompt_name: &str) -> Self {
        UpstreamEvent::PromptEnd(PromptEnd {
            prompt_name: prompt_name.to_string(),
        })
    }

    pub fn session_end() -> Self {
        UpstreamEvent::SessionEnd(SessionEnd {})
    }

    /// Wire name of this event's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamEvent::SessionStart(_) => "sessionStart",
            UpstreamEvent::PromptStart(_) => "promptStart",
            UpstreamEvent::ContentStart(_) => "contentStart",
            UpstreamEvent::TextInput(_) => "textInput",
            UpstreamEvent::AudioInput(_) => "audioInput",
            UpstreamEvent::ToolResult(_) => "toolResult",
            UpstreamEvent::ContentEnd(_) => "contentEnd",
            UpstreamEvent::PromptEnd(_) => "promptEnd",
            UpstreamEvent::SessionEnd(_) => "sessionEnd",
        }
    }

    /// Content block this event belongs to, when it has one.
    pub fn content_name(&self) -> Option<&str> {
        match self {
            UpstreamEvent::ContentStart(e) => Some(&e.content_name),
            UpstreamEvent::TextInput(e)
            | UpstreamEvent::AudioInput(e)
            | UpstreamEvent::ToolResult(e) => Some(&e.content_name),
            UpstreamEvent::ContentEnd(e) => Some(&e.content_name),
            _ => None,
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            bytes: serde_json::to_vec(&Envelope { event: self })
                .expect("upstream event serialization is infallible"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn envelope(event: &UpstreamEvent) -> Value {
        serde_json::from_slice(&event.to_frame().bytes).unwrap()
    }

    #[test]
    fn session_start_envelope_shape() {
        let event = UpstreamEvent::session_start(InferenceConfig::default(), None);
        let json = envelope(&event);
        let payload = &json["event"]["sessionStart"];
        assert_eq!(payload["inferenceConfiguration"]["maxTokens"], 1024);
        assert!(payload.get("turnDetectionConfiguration").is_none());
    }

    #[test]
    fn prompt_start_carries_tool_configuration() {
        let specs = vec![ToolSpec {
            name: "get_weather".to_string(),
            description: "Weather lookup".to_string(),
            schema: r#"{"type":"object"}"#.to_string(),
        }];
        let event =
            UpstreamEvent::prompt_start("prompt-1", "matthew", 24_000, specs, ToolChoice::Auto {});
        let json = envelope(&event);
        let payload = &json["event"]["promptStart"];

        assert_eq!(payload["promptName"], "prompt-1");
        assert_eq!(payload["audioOutputConfiguration"]["sampleRateHertz"], 24_000);
        assert_eq!(payload["audioOutputConfiguration"]["voiceId"], "matthew");
        assert_eq!(
            payload["toolConfiguration"]["tools"][0]["toolSpec"]["name"],
            "get_weather"
        );
        // Schema travels as a JSON string, not a nested object.
        assert!(payload["toolConfiguration"]["tools"][0]["toolSpec"]["inputSchema"]["json"]
            .is_string());
        assert_eq!(payload["toolConfiguration"]["toolChoice"], serde_json::json!({"auto": {}}));
    }

    #[test]
    fn audio_content_start_describes_pcm16_input() {
        let event = UpstreamEvent::content_start_audio("p", "audio-1");
        let json = envelope(&event);
        let payload = &json["event"]["contentStart"];
        assert_eq!(payload["type"], "AUDIO");
        assert_eq!(payload["role"], "USER");
        assert_eq!(payload["audioInputConfiguration"]["sampleRateHertz"], 16_000);
        assert_eq!(payload["audioInputConfiguration"]["mediaType"], "audio/lpcm");
        assert!(payload.get("textInputConfiguration").is_none());
    }

    #[test]
    fn tool_content_start_is_non_interactive_and_references_tool_use() {
        let event = UpstreamEvent::content_start_tool("p", "c", "t-1");
        let json = envelope(&event);
        let payload = &json["event"]["contentStart"];
        assert_eq!(payload["type"], "TOOL");
        assert_eq!(payload["interactive"], false);
        assert_eq!(payload["toolResultInputConfiguration"]["toolUseId"], "t-1");
    }

    #[test]
    fn session_end_serializes_to_empty_object() {
        let json = envelope(&UpstreamEvent::session_end());
        assert_eq!(json["event"]["sessionEnd"], serde_json::json!({}));
    }

    #[test]
    fn kind_names_match_wire_kinds() {
        let event = UpstreamEvent::text_input("p", "c", "hello");
        let json = envelope(&event);
        assert!(json["event"].get(event.kind()).is_some());
        assert_eq!(event.content_name(), Some("c"));
    }
}
