//! Barge-in handling.
//!
//! An interrupt snapshots what the user has heard, then drops everything still
//! queued. The snapshot becomes a [`TruncationIntent`] telling the server where
//! the user stopped hearing the response. A flush is never undone, even if the
//! intent cannot be delivered.

use crate::playback::PlaybackQueue;
use openai_realtime_types::ClientEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationIntent {
    pub item_id: String,
    pub content_index: u32,
    pub audio_end_ms: u64,
}

impl TruncationIntent {
    pub fn into_client_event(self) -> ClientEvent {
        ClientEvent::truncate_item(self.item_id, self.content_index, self.audio_end_ms)
    }
}

impl From<TruncationIntent> for ClientEvent {
    fn from(intent: TruncationIntent) -> Self {
        intent.into_client_event()
    }
}

#[derive(Debug)]
pub struct InterruptCoordinator {
    queue: Arc<PlaybackQueue>,
    interrupting: AtomicBool,
}

impl InterruptCoordinator {
    pub fn new(queue: Arc<PlaybackQueue>) -> Self {
        Self {
            queue,
            interrupting: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    pub fn is_interrupting(&self) -> bool {
        self.interrupting.load(Ordering::Acquire)
    }

    /// Stops playback and returns where the user stopped hearing it, if
    /// anything was audible. A call that overlaps a running interrupt returns
    /// `None` and changes nothing.
    pub fn interrupt(&self) -> Option<TruncationIntent> {
        if self
            .interrupting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Interrupt already in progress.");
            return None;
        }

        // one render-lock hold: nothing plays between the snapshot and the flush
        let (cursor, discarded) = self.queue.snapshot_and_flush();
        let intent = cursor.map(|cursor| TruncationIntent {
            item_id: cursor.item_id,
            content_index: cursor.content_index,
            audio_end_ms: cursor.elapsed_ms,
        });
        debug!(discarded, truncate = ?intent, "Playback interrupted.");

        self.interrupting.store(false, Ordering::Release);
        intent
    }
}
