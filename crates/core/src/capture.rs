//! Hands captured microphone audio to the outbound path.
//!
//! Frames arrive already converted to the wire format. The bridge splits them
//! into append intents of at most `max_chunk_samples` and `try_send`s each one;
//! it never waits. A chunk that does not fit in the outbound channel is dropped
//! and counted.

use crate::audio;
use openai_realtime_types::ClientEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// 100 ms at the wire rate.
pub const DEFAULT_CHUNK_SAMPLES: usize = 2400;

#[derive(Debug, Clone)]
pub struct CaptureBridge {
    outbound: mpsc::Sender<ClientEvent>,
    listening: Arc<AtomicBool>,
    max_chunk_samples: usize,
    dropped: Arc<AtomicU64>,
}

impl CaptureBridge {
    pub fn new(outbound: mpsc::Sender<ClientEvent>, listening: Arc<AtomicBool>) -> Self {
        Self {
            outbound,
            listening,
            max_chunk_samples: DEFAULT_CHUNK_SAMPLES,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_chunk_samples(mut self, max_chunk_samples: usize) -> Self {
        self.max_chunk_samples = max_chunk_samples.max(1);
        self
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Chunks dropped because the outbound channel was full or closed.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Forwards one captured frame. Returns the number of append intents handed
    /// off. Frames captured while not listening are discarded.
    pub fn on_captured_frame(&self, frame: &[i16]) -> usize {
        if frame.is_empty() || !self.is_listening() {
            return 0;
        }
        let mut sent = 0;
        for chunk in frame.chunks(self.max_chunk_samples) {
            let event = ClientEvent::append_input_audio(audio::pcm16_to_bytes(chunk));
            match self.outbound.try_send(event) {
                Ok(()) => sent += 1,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        sent
    }
}
