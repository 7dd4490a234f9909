//! Events sent by the server.
//!
//! [`ServerEvent`] is a closed union keyed by the wire `type` string. Types the
//! server may add later are rejected by the codec before typed decoding, see
//! [`crate::codec::decode`].

use crate::error::{RateLimit, ServerError};
use crate::item::{ContentPart, Item};
use crate::response::Response;
use crate::session::{Session, TranscriptionSession};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub event_id: String,
    pub error: ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(default)]
    pub event_id: String,
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSessionEvent {
    #[serde(default)]
    pub event_id: String,
    pub session: TranscriptionSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResource {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationCreatedEvent {
    #[serde(default)]
    pub event_id: String,
    pub conversation: ConversationResource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioBufferCommittedEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub previous_item_id: Option<String>,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioBufferClearedEvent {
    #[serde(default)]
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechStartedEvent {
    #[serde(default)]
    pub event_id: String,
    /// Milliseconds since the session started when speech was detected.
    #[serde(default)]
    pub audio_start_ms: u64,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechStoppedEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub audio_end_ms: u64,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCreatedEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub previous_item_id: Option<String>,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDeletedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTruncatedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    pub content_index: u32,
    pub audio_end_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionCompletedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    pub content_index: u32,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionDeltaEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub content_index: u32,
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionFailedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    pub content_index: u32,
    pub error: ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAudioBufferEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    #[serde(default)]
    pub event_id: String,
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItemEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub output_index: u32,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPartEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub part: ContentPart,
}

/// A text fragment for a text part or for the transcript of an audio part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDeltaEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDoneEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTranscriptDoneEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub transcript: String,
}

/// A fragment of model audio, already decoded from base64 to raw PCM16 bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeltaEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    #[serde(with = "crate::base64_bytes")]
    pub delta: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDoneEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallArgumentsDeltaEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub call_id: String,
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallArgumentsDoneEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub call_id: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitsUpdatedEvent {
    #[serde(default)]
    pub event_id: String,
    pub rate_limits: Vec<RateLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionEvent),
    #[serde(rename = "transcription_session.created")]
    TranscriptionSessionCreated(TranscriptionSessionEvent),
    #[serde(rename = "transcription_session.updated")]
    TranscriptionSessionUpdated(TranscriptionSessionEvent),
    #[serde(rename = "conversation.created")]
    ConversationCreated(ConversationCreatedEvent),
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated(ItemCreatedEvent),
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted(ItemDeletedEvent),
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated(ItemTruncatedEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted(TranscriptionCompletedEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputAudioTranscriptionDelta(TranscriptionDeltaEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed(TranscriptionFailedEvent),
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted(InputAudioBufferCommittedEvent),
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared(InputAudioBufferClearedEvent),
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted(SpeechStartedEvent),
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped(SpeechStoppedEvent),
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted(OutputAudioBufferEvent),
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped(OutputAudioBufferEvent),
    #[serde(rename = "response.created")]
    ResponseCreated(ResponseEvent),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseEvent),
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded(OutputItemEvent),
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone(OutputItemEvent),
    #[serde(rename = "response.content_part.added")]
    ResponseContentPartAdded(ContentPartEvent),
    #[serde(rename = "response.content_part.done")]
    ResponseContentPartDone(ContentPartEvent),
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta(ContentDeltaEvent),
    #[serde(rename = "response.text.done")]
    ResponseTextDone(TextDoneEvent),
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta(ContentDeltaEvent),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(AudioTranscriptDoneEvent),
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta(AudioDeltaEvent),
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone(AudioDoneEvent),
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta(FunctionCallArgumentsDeltaEvent),
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone(FunctionCallArgumentsDoneEvent),
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated(RateLimitsUpdatedEvent),
}

/// Every `type` discriminant this crate can decode. Must list the same names as
/// the `rename` attributes on [`ServerEvent`].
pub const EVENT_TYPES: &[&str] = &[
    "error",
    "session.created",
    "session.updated",
    "transcription_session.created",
    "transcription_session.updated",
    "conversation.created",
    "conversation.item.created",
    "conversation.item.deleted",
    "conversation.item.truncated",
    "conversation.item.input_audio_transcription.completed",
    "conversation.item.input_audio_transcription.delta",
    "conversation.item.input_audio_transcription.failed",
    "input_audio_buffer.committed",
    "input_audio_buffer.cleared",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "output_audio_buffer.started",
    "output_audio_buffer.stopped",
    "response.created",
    "response.done",
    "response.output_item.added",
    "response.output_item.done",
    "response.content_part.added",
    "response.content_part.done",
    "response.text.delta",
    "response.text.done",
    "response.audio_transcript.delta",
    "response.audio_transcript.done",
    "response.audio.delta",
    "response.audio.done",
    "response.function_call_arguments.delta",
    "response.function_call_arguments.done",
    "rate_limits.updated",
];

impl ServerEvent {
    pub fn is_known_type(event_type: &str) -> bool {
        EVENT_TYPES.contains(&event_type)
    }

    /// The wire discriminant of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Error(_) => "error",
            ServerEvent::SessionCreated(_) => "session.created",
            ServerEvent::SessionUpdated(_) => "session.updated",
            ServerEvent::TranscriptionSessionCreated(_) => "transcription_session.created",
            ServerEvent::TranscriptionSessionUpdated(_) => "transcription_session.updated",
            ServerEvent::ConversationCreated(_) => "conversation.created",
            ServerEvent::ConversationItemCreated(_) => "conversation.item.created",
            ServerEvent::ConversationItemDeleted(_) => "conversation.item.deleted",
            ServerEvent::ConversationItemTruncated(_) => "conversation.item.truncated",
            ServerEvent::InputAudioTranscriptionCompleted(_) => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::InputAudioTranscriptionDelta(_) => {
                "conversation.item.input_audio_transcription.delta"
            }
            ServerEvent::InputAudioTranscriptionFailed(_) => {
                "conversation.item.input_audio_transcription.failed"
            }
            ServerEvent::InputAudioBufferCommitted(_) => "input_audio_buffer.committed",
            ServerEvent::InputAudioBufferCleared(_) => "input_audio_buffer.cleared",
            ServerEvent::InputAudioBufferSpeechStarted(_) => "input_audio_buffer.speech_started",
            ServerEvent::InputAudioBufferSpeechStopped(_) => "input_audio_buffer.speech_stopped",
            ServerEvent::OutputAudioBufferStarted(_) => "output_audio_buffer.started",
            ServerEvent::OutputAudioBufferStopped(_) => "output_audio_buffer.stopped",
            ServerEvent::ResponseCreated(_) => "response.created",
            ServerEvent::ResponseDone(_) => "response.done",
            ServerEvent::ResponseOutputItemAdded(_) => "response.output_item.added",
            ServerEvent::ResponseOutputItemDone(_) => "response.output_item.done",
            ServerEvent::ResponseContentPartAdded(_) => "response.content_part.added",
            ServerEvent::ResponseContentPartDone(_) => "response.content_part.done",
            ServerEvent::ResponseTextDelta(_) => "response.text.delta",
            ServerEvent::ResponseTextDone(_) => "response.text.done",
            ServerEvent::ResponseAudioTranscriptDelta(_) => "response.audio_transcript.delta",
            ServerEvent::ResponseAudioTranscriptDone(_) => "response.audio_transcript.done",
            ServerEvent::ResponseAudioDelta(_) => "response.audio.delta",
            ServerEvent::ResponseAudioDone(_) => "response.audio.done",
            ServerEvent::ResponseFunctionCallArgumentsDelta(_) => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::ResponseFunctionCallArgumentsDone(_) => {
                "response.function_call_arguments.done"
            }
            ServerEvent::RateLimitsUpdated(_) => "rate_limits.updated",
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            ServerEvent::Error(e) => &e.event_id,
            ServerEvent::SessionCreated(e) | ServerEvent::SessionUpdated(e) => &e.event_id,
            ServerEvent::TranscriptionSessionCreated(e) | ServerEvent::TranscriptionSessionUpdated(e) => {
                &e.event_id
            }
            ServerEvent::ConversationCreated(e) => &e.event_id,
            ServerEvent::ConversationItemCreated(e) => &e.event_id,
            ServerEvent::ConversationItemDeleted(e) => &e.event_id,
            ServerEvent::ConversationItemTruncated(e) => &e.event_id,
            ServerEvent::InputAudioTranscriptionCompleted(e) => &e.event_id,
            ServerEvent::InputAudioTranscriptionDelta(e) => &e.event_id,
            ServerEvent::InputAudioTranscriptionFailed(e) => &e.event_id,
            ServerEvent::InputAudioBufferCommitted(e) => &e.event_id,
            ServerEvent::InputAudioBufferCleared(e) => &e.event_id,
            ServerEvent::InputAudioBufferSpeechStarted(e) => &e.event_id,
            ServerEvent::InputAudioBufferSpeechStopped(e) => &e.event_id,
            ServerEvent::OutputAudioBufferStarted(e) | ServerEvent::OutputAudioBufferStopped(e) => {
                &e.event_id
            }
            ServerEvent::ResponseCreated(e) | ServerEvent::ResponseDone(e) => &e.event_id,
            ServerEvent::ResponseOutputItemAdded(e) | ServerEvent::ResponseOutputItemDone(e) => {
                &e.event_id
            }
            ServerEvent::ResponseContentPartAdded(e) | ServerEvent::ResponseContentPartDone(e) => {
                &e.event_id
            }
            ServerEvent::ResponseTextDelta(e) | ServerEvent::ResponseAudioTranscriptDelta(e) => {
                &e.event_id
            }
            ServerEvent::ResponseTextDone(e) => &e.event_id,
            ServerEvent::ResponseAudioTranscriptDone(e) => &e.event_id,
            ServerEvent::ResponseAudioDelta(e) => &e.event_id,
            ServerEvent::ResponseAudioDone(e) => &e.event_id,
            ServerEvent::ResponseFunctionCallArgumentsDelta(e) => &e.event_id,
            ServerEvent::ResponseFunctionCallArgumentsDone(e) => &e.event_id,
            ServerEvent::RateLimitsUpdated(e) => &e.event_id,
        }
    }

    /// The conversation item this event addresses, if any.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            ServerEvent::ConversationItemCreated(e) => e.item.id(),
            ServerEvent::ConversationItemDeleted(e) => Some(&e.item_id),
            ServerEvent::ConversationItemTruncated(e) => Some(&e.item_id),
            ServerEvent::InputAudioTranscriptionCompleted(e) => Some(&e.item_id),
            ServerEvent::InputAudioTranscriptionDelta(e) => Some(&e.item_id),
            ServerEvent::InputAudioTranscriptionFailed(e) => Some(&e.item_id),
            ServerEvent::InputAudioBufferCommitted(e) => Some(&e.item_id),
            ServerEvent::InputAudioBufferSpeechStarted(e) => Some(&e.item_id),
            ServerEvent::InputAudioBufferSpeechStopped(e) => Some(&e.item_id),
            ServerEvent::ResponseOutputItemAdded(e) | ServerEvent::ResponseOutputItemDone(e) => {
                e.item.id()
            }
            ServerEvent::ResponseContentPartAdded(e) | ServerEvent::ResponseContentPartDone(e) => {
                Some(&e.item_id)
            }
            ServerEvent::ResponseTextDelta(e) | ServerEvent::ResponseAudioTranscriptDelta(e) => {
                Some(&e.item_id)
            }
            ServerEvent::ResponseTextDone(e) => Some(&e.item_id),
            ServerEvent::ResponseAudioTranscriptDone(e) => Some(&e.item_id),
            ServerEvent::ResponseAudioDelta(e) => Some(&e.item_id),
            ServerEvent::ResponseAudioDone(e) => Some(&e.item_id),
            ServerEvent::ResponseFunctionCallArgumentsDelta(e) => Some(&e.item_id),
            ServerEvent::ResponseFunctionCallArgumentsDone(e) => Some(&e.item_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let event = ServerEvent::ConversationItemDeleted(ItemDeletedEvent {
            event_id: "ev_1".into(),
            item_id: "item_1".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
        assert!(ServerEvent::is_known_type(event.event_type()));
        assert_eq!(event.event_id(), "ev_1");
        assert_eq!(event.item_id(), Some("item_1"));
    }

    #[test]
    fn test_known_types_are_unique() {
        let mut sorted = EVENT_TYPES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), EVENT_TYPES.len());
    }
}
