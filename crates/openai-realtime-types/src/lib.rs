//! Wire schema for the OpenAI Realtime protocol.
//!
//! Every message on the realtime channel is a JSON object discriminated by a
//! `type` string. This crate holds the typed shapes of those messages and the
//! codec that turns raw frames into [`ServerEvent`]s and [`ClientEvent`]s into
//! frames. It performs no I/O.

mod base64_bytes;
pub mod client_event;
pub mod codec;
pub mod error;
pub mod item;
pub mod response;
pub mod server_event;
pub mod session;

pub use client_event::ClientEvent;
pub use codec::{DecodeError, EncodeError, decode, decode_str, encode};
pub use error::{RateLimit, ServerError};
pub use item::{ContentPart, FunctionCall, FunctionCallOutput, Item, ItemRole, ItemStatus, Message};
pub use response::{Response, ResponseConfig, ResponseStatus, Usage};
pub use server_event::ServerEvent;
pub use session::{
    AudioFormat, InputAudioTranscription, MaxTokens, Modality, Session, ToolDefinition,
    TranscriptionModel, TranscriptionSession, TurnDetection, Voice,
};
