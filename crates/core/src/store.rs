//! The in-memory conversation model.
//!
//! [`ConversationStore::apply`] is the only way state changes. Events are
//! applied in arrival order by a single writer; deltas append, `*.done` events
//! overwrite with the server's final value. A reference to an item or content
//! part the store does not have is reported as an [`ApplyError`] and leaves the
//! store untouched.

use crate::audio;
use crate::error::ApplyError;
use openai_realtime_types::server_event::ServerEvent;
use openai_realtime_types::{
    ContentPart, FunctionCall, Item, Message, RateLimit, Response, Session, TranscriptionSession,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    session: Option<Session>,
    transcription_session: Option<TranscriptionSession>,
    conversation_id: Option<String>,
    items: Vec<Item>,
    /// item id -> position in `items`
    index: HashMap<String, usize>,
    rate_limits: Vec<RateLimit>,
    last_response: Option<Response>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn transcription_session(&self) -> Option<&TranscriptionSession> {
        self.transcription_session.as_ref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Items in arrival order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    /// Message items only, in arrival order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().filter_map(Item::as_message)
    }

    pub fn rate_limits(&self) -> &[RateLimit] {
        &self.rate_limits
    }

    pub fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Applies one server event.
    ///
    /// Events that carry no conversation state (speech started/stopped, buffer
    /// commits, errors, ...) are accepted and ignored.
    pub fn apply(&mut self, event: &ServerEvent) -> Result<(), ApplyError> {
        match event {
            ServerEvent::SessionCreated(e) | ServerEvent::SessionUpdated(e) => {
                self.session = Some(e.session.clone());
            }
            ServerEvent::TranscriptionSessionCreated(e) | ServerEvent::TranscriptionSessionUpdated(e) => {
                self.transcription_session = Some(e.session.clone());
            }
            ServerEvent::ConversationCreated(e) => {
                self.conversation_id = Some(e.conversation.id.clone());
            }
            ServerEvent::ConversationItemCreated(e) => self.insert(e.item.clone())?,
            ServerEvent::ConversationItemDeleted(e) => self.remove(&e.item_id)?,
            ServerEvent::ConversationItemTruncated(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::Audio { audio, .. } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "audio"));
                };
                let end = usize::try_from(audio::ms_to_bytes(e.audio_end_ms)).unwrap_or(usize::MAX);
                audio.truncate(end);
            }
            ServerEvent::InputAudioTranscriptionCompleted(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::InputAudio { transcript, .. } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "input audio"));
                };
                *transcript = Some(e.transcript.clone());
            }
            ServerEvent::InputAudioTranscriptionDelta(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::InputAudio { transcript, .. } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "input audio"));
                };
                transcript.get_or_insert_with(String::new).push_str(&e.delta);
            }
            ServerEvent::ResponseContentPartAdded(e) => {
                let message = self.message_mut(&e.item_id)?;
                let len = message.content.len();
                if e.content_index as usize != len {
                    return Err(ApplyError::NonContiguousPart {
                        item_id: e.item_id.clone(),
                        content_index: e.content_index,
                        len,
                    });
                }
                message.content.push(e.part.clone());
            }
            ServerEvent::ResponseContentPartDone(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                *part = merge_part(part, e.part.clone());
            }
            ServerEvent::ResponseTextDelta(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::Text { text } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "text"));
                };
                text.push_str(&e.delta);
            }
            ServerEvent::ResponseTextDone(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                *part = ContentPart::text(e.text.clone());
            }
            ServerEvent::ResponseAudioTranscriptDelta(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::Audio { transcript, .. } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "audio"));
                };
                transcript.get_or_insert_with(String::new).push_str(&e.delta);
            }
            ServerEvent::ResponseAudioTranscriptDone(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::Audio { transcript, .. } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "audio"));
                };
                *transcript = Some(e.transcript.clone());
            }
            ServerEvent::ResponseAudioDelta(e) => {
                let part = self.part_mut(&e.item_id, e.content_index)?;
                let ContentPart::Audio { audio, .. } = part else {
                    return Err(mismatch(&e.item_id, e.content_index, "audio"));
                };
                audio.extend_from_slice(&e.delta);
            }
            ServerEvent::ResponseAudioDone(e) => {
                // nothing to finalize, but the address must still resolve
                self.part_mut(&e.item_id, e.content_index)?;
            }
            ServerEvent::ResponseFunctionCallArgumentsDelta(e) => {
                self.function_call_mut(&e.item_id)?.arguments.push_str(&e.delta);
            }
            ServerEvent::ResponseFunctionCallArgumentsDone(e) => {
                self.function_call_mut(&e.item_id)?.arguments = e.arguments.clone();
            }
            ServerEvent::ResponseOutputItemDone(e) => self.replace(&e.item)?,
            ServerEvent::ResponseCreated(e) | ServerEvent::ResponseDone(e) => {
                self.last_response = Some(e.response.clone());
            }
            ServerEvent::RateLimitsUpdated(e) => {
                self.rate_limits = e.rate_limits.clone();
            }
            ServerEvent::Error(_)
            | ServerEvent::InputAudioTranscriptionFailed(_)
            | ServerEvent::InputAudioBufferCommitted(_)
            | ServerEvent::InputAudioBufferCleared(_)
            | ServerEvent::InputAudioBufferSpeechStarted(_)
            | ServerEvent::InputAudioBufferSpeechStopped(_)
            | ServerEvent::OutputAudioBufferStarted(_)
            | ServerEvent::OutputAudioBufferStopped(_)
            | ServerEvent::ResponseOutputItemAdded(_) => {}
        }
        Ok(())
    }

    fn insert(&mut self, item: Item) -> Result<(), ApplyError> {
        let id = item.id().ok_or(ApplyError::MissingItemId)?.to_string();
        if self.index.contains_key(&id) {
            return Err(ApplyError::DuplicateItem(id));
        }
        self.index.insert(id, self.items.len());
        self.items.push(item);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<(), ApplyError> {
        let pos = self
            .index
            .remove(id)
            .ok_or_else(|| ApplyError::UnknownItem(id.to_string()))?;
        self.items.remove(pos);
        for item in &self.items[pos..] {
            if let Some(slot) = item.id().and_then(|id| self.index.get_mut(id)) {
                *slot -= 1;
            }
        }
        Ok(())
    }

    fn replace(&mut self, item: &Item) -> Result<(), ApplyError> {
        let id = item.id().ok_or(ApplyError::MissingItemId)?;
        let pos = self.position(id)?;
        match (&mut self.items[pos], item) {
            (Item::Message(current), Item::Message(done)) => {
                let mut done = done.clone();
                for (i, part) in done.content.iter_mut().enumerate() {
                    if let Some(previous) = current.content.get(i) {
                        *part = merge_part(previous, part.clone());
                    }
                }
                *current = done;
            }
            (Item::FunctionCall(current), Item::FunctionCall(done)) => *current = done.clone(),
            _ => {
                return Err(ApplyError::KindMismatch {
                    item_id: id.to_string(),
                    expected: "message or function call",
                });
            }
        }
        Ok(())
    }

    fn position(&self, id: &str) -> Result<usize, ApplyError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ApplyError::UnknownItem(id.to_string()))
    }

    fn message_mut(&mut self, id: &str) -> Result<&mut Message, ApplyError> {
        let pos = self.position(id)?;
        match &mut self.items[pos] {
            Item::Message(message) => Ok(message),
            _ => Err(ApplyError::KindMismatch {
                item_id: id.to_string(),
                expected: "message",
            }),
        }
    }

    fn function_call_mut(&mut self, id: &str) -> Result<&mut FunctionCall, ApplyError> {
        let pos = self.position(id)?;
        match &mut self.items[pos] {
            Item::FunctionCall(call) => Ok(call),
            _ => Err(ApplyError::KindMismatch {
                item_id: id.to_string(),
                expected: "function call",
            }),
        }
    }

    fn part_mut(&mut self, id: &str, content_index: u32) -> Result<&mut ContentPart, ApplyError> {
        let message = self.message_mut(id)?;
        let len = message.content.len();
        message
            .content
            .get_mut(content_index as usize)
            .ok_or_else(|| ApplyError::ContentIndexOutOfRange {
                item_id: id.to_string(),
                content_index,
                len,
            })
    }
}

fn mismatch(item_id: &str, content_index: u32, expected: &'static str) -> ApplyError {
    ApplyError::VariantMismatch {
        item_id: item_id.to_string(),
        content_index,
        expected,
    }
}

/// The server's final part wins, except that final audio parts arrive without
/// their bytes; accumulated bytes are carried over.
fn merge_part(previous: &ContentPart, done: ContentPart) -> ContentPart {
    match (previous, done) {
        (
            ContentPart::Audio { audio: kept, .. },
            ContentPart::Audio {
                audio,
                transcript,
            },
        ) if audio.is_empty() => ContentPart::Audio {
            audio: kept.clone(),
            transcript,
        },
        (_, done) => done,
    }
}
