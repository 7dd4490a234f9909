//! Client-side engine for realtime voice/text conversations.
//!
//! The engine sits between the wire protocol and the audio devices. Inbound
//! events are applied to a [`ConversationStore`]; model audio is queued on a
//! [`PlaybackQueue`] that the output device pulls from; barge-in runs through
//! the [`InterruptCoordinator`]; microphone audio enters through a
//! [`CaptureBridge`]. [`Conversation`] ties them to one connection.

pub mod audio;
pub mod capture;
pub mod engine;
pub mod error;
pub mod interrupt;
pub mod playback;
pub mod store;

pub use capture::CaptureBridge;
pub use engine::{Conversation, ConversationOptions, EngineState};
pub use error::{ApplyError, ConversationError, EngineError, PlaybackError};
pub use interrupt::{InterruptCoordinator, TruncationIntent};
pub use playback::{AudioSegment, PlaybackCursor, PlaybackQueue, PlaybackTransitions};
pub use store::ConversationStore;
