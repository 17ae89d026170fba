//! Wire types for the OpenAI-compatible realtime protocol.
//!
//! Only the events this crate sends or reacts to are modelled; every other
//! server event decodes as [`ServerEvent::Other`].

use kemet_core::{
    context::{ChatMessage, Role},
    tools::ToolSpec,
};
use serde::{Deserialize, Serialize};

// --- Client -> server ---

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Item },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub instructions: String,
    pub voice: String,
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: Transcription,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Transcription {
    pub model: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function {
        name: String,
        description: String,
        parameters: serde_json::Value,
    },
}

impl From<ToolSpec> for ToolDefinition {
    fn from(spec: ToolSpec) -> Self {
        ToolDefinition::Function {
            name: spec.name,
            description: spec.description,
            parameters: spec.parameters,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message {
        role: Role,
        content: Vec<ItemContent>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemContent {
    InputText { text: String },
    Text { text: String },
}

impl From<&ChatMessage> for Item {
    fn from(message: &ChatMessage) -> Self {
        let content = match message.role {
            Role::Assistant => ItemContent::Text {
                text: message.content.clone(),
            },
            Role::System | Role::User => ItemContent::InputText {
                text: message.content.clone(),
            },
        };
        Item::Message {
            role: message.role,
            content: vec![content],
        }
    }
}

impl SessionConfig {
    /// Voice session with server-side turn detection and input transcription.
    pub fn voice(instructions: String, voice: String, tools: Vec<ToolDefinition>) -> Self {
        Self {
            instructions,
            voice,
            modalities: vec!["text".to_string(), "audio".to_string()],
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Transcription {
                model: "whisper-1".to_string(),
            },
            turn_detection: TurnDetection::ServerVad {
                threshold: 0.5,
                prefix_padding_ms: 200,
                silence_duration_ms: 700,
            },
            tools,
            tool_choice: "auto".to_string(),
        }
    }
}

/// The two events that hand a tool result back and ask for a spoken reply.
pub fn function_call_reply(call_id: String, output: String) -> [ClientEvent; 2] {
    [
        ClientEvent::ConversationItemCreate {
            item: Item::FunctionCallOutput { call_id, output },
        },
        ClientEvent::ResponseCreate,
    ]
}

// --- Server -> client ---

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    ResponseAudioDelta,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },
    #[serde(other)]
    Other,
}

/// Error payload of a server `error` event. Every field is optional on the
/// wire.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ErrorDetail {
    /// The message, else the code, else the error type.
    pub fn summary(self) -> String {
        [self.message, self.code, self.kind]
            .into_iter()
            .flatten()
            .find(|part| !part.trim().is_empty())
            .unwrap_or_else(|| "unspecified realtime error".to_string())
    }
}
