//! Conversation items and their content parts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    InProgress,
    Incomplete,
}

/// One addressable unit of a message's payload.
///
/// Audio bytes are raw PCM16 in memory and base64 on the wire. `transcript`
/// grows through `*.delta` events until the matching `*.done` replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    Audio {
        #[serde(default, with = "crate::base64_bytes", skip_serializing_if = "Vec::is_empty")]
        audio: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    InputText {
        #[serde(default)]
        text: String,
    },
    InputAudio {
        #[serde(default, with = "crate::base64_bytes", skip_serializing_if = "Vec::is_empty")]
        audio: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn input_text(text: impl Into<String>) -> Self {
        ContentPart::InputText { text: text.into() }
    }

    pub fn input_audio(audio: Vec<u8>) -> Self {
        ContentPart::InputAudio {
            audio,
            transcript: None,
        }
    }

    /// The human-readable text of this part: the text itself, or the transcript
    /// of an audio part.
    pub fn display_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } | ContentPart::InputText { text } => Some(text),
            ContentPart::Audio { transcript, .. } | ContentPart::InputAudio { transcript, .. } => {
                transcript.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: ItemRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: ItemRole, content: Vec<ContentPart>) -> Self {
        Self {
            id: None,
            role,
            status: None,
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments, accumulated from argument deltas.
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message(Message),
    FunctionCall(FunctionCall),
    FunctionCallOutput(FunctionCallOutput),
}

impl Item {
    pub fn id(&self) -> Option<&str> {
        match self {
            Item::Message(m) => m.id.as_deref(),
            Item::FunctionCall(f) => f.id.as_deref(),
            Item::FunctionCallOutput(o) => o.id.as_deref(),
        }
    }

    /// Builds a message item from a single text part. User and system text is
    /// sent as `input_text`; assistant text as `text`.
    pub fn text_message(role: ItemRole, text: impl Into<String>) -> Self {
        let part = match role {
            ItemRole::Assistant => ContentPart::text(text),
            ItemRole::User | ItemRole::System => ContentPart::input_text(text),
        };
        Item::Message(Message::new(role, vec![part]))
    }

    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Item::FunctionCallOutput(FunctionCallOutput {
            id: None,
            call_id: call_id.into(),
            output: output.into(),
        })
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Item::Message(m) => Some(m),
            _ => None,
        }
    }
}
