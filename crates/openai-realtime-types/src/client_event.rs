//! Events sent by the client.

use crate::item::Item;
use crate::response::ResponseConfig;
use crate::session::{Session, TranscriptionSession};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Session,
    },
    #[serde(rename = "transcription_session.update")]
    TranscriptionSessionUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: TranscriptionSession,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        /// Raw PCM16 bytes; base64 on the wire.
        #[serde(with = "crate::base64_bytes")]
        audio: Vec<u8>,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item_id: String,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

impl ClientEvent {
    pub fn update_session(session: Session) -> Self {
        ClientEvent::SessionUpdate {
            event_id: None,
            session,
        }
    }

    pub fn update_transcription_session(session: TranscriptionSession) -> Self {
        ClientEvent::TranscriptionSessionUpdate {
            event_id: None,
            session,
        }
    }

    pub fn append_input_audio(audio: Vec<u8>) -> Self {
        ClientEvent::InputAudioBufferAppend {
            event_id: None,
            audio,
        }
    }

    pub fn commit_input_audio() -> Self {
        ClientEvent::InputAudioBufferCommit { event_id: None }
    }

    pub fn clear_input_audio() -> Self {
        ClientEvent::InputAudioBufferClear { event_id: None }
    }

    pub fn create_item(item: Item) -> Self {
        ClientEvent::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn truncate_item(item_id: impl Into<String>, content_index: u32, audio_end_ms: u64) -> Self {
        ClientEvent::ConversationItemTruncate {
            event_id: None,
            item_id: item_id.into(),
            content_index,
            audio_end_ms,
        }
    }

    pub fn delete_item(item_id: impl Into<String>) -> Self {
        ClientEvent::ConversationItemDelete {
            event_id: None,
            item_id: item_id.into(),
        }
    }

    pub fn create_response(response: Option<ResponseConfig>) -> Self {
        ClientEvent::ResponseCreate {
            event_id: None,
            response,
        }
    }

    pub fn cancel_response() -> Self {
        ClientEvent::ResponseCancel { event_id: None }
    }

    /// The wire discriminant of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::TranscriptionSessionUpdate { .. } => "transcription_session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit { .. } => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear { .. } => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ConversationItemDelete { .. } => "conversation.item.delete",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel { .. } => "response.cancel",
        }
    }
}
