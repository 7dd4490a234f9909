use openai_realtime::TransportError;
use openai_realtime_types::{EncodeError, ServerError};

/// An event referenced state the store does not have. The event is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("unknown item `{0}`")]
    UnknownItem(String),
    #[error("item `{0}` already exists")]
    DuplicateItem(String),
    #[error("item has no id")]
    MissingItemId,
    #[error("item `{item_id}` is not a {expected}")]
    KindMismatch {
        item_id: String,
        expected: &'static str,
    },
    #[error("item `{item_id}` has no content part {content_index} (len {len})")]
    ContentIndexOutOfRange {
        item_id: String,
        content_index: u32,
        len: usize,
    },
    #[error("content part {content_index} of item `{item_id}` is not contiguous (len {len})")]
    NonContiguousPart {
        item_id: String,
        content_index: u32,
        len: usize,
    },
    #[error("content part {content_index} of item `{item_id}` is not {expected}")]
    VariantMismatch {
        item_id: String,
        content_index: u32,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("playback queue is full ({capacity} segments)")]
    Full { capacity: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no session has been created yet")]
    SessionNotFound,
    #[error("conversation is shut down")]
    Closed,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Errors published on the conversation's error stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversationError {
    #[error("server error: {0}")]
    Protocol(ServerError),
    #[error("transport error: {0}")]
    Transport(String),
}
