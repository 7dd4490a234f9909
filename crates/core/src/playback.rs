//! Ordered playback of decoded audio segments.
//!
//! Segments flow through an SPSC ring buffer: the network side pushes, the
//! audio output callback pulls samples with [`PlaybackQueue::render`]. The render
//! side only ever `try_lock`s its half; if the control context holds it (for a
//! cursor snapshot or a flush) the callback outputs silence for that period and
//! counts nothing as played.
//!
//! Finished segments are not dropped on the render path. They go into a second
//! ring and are freed by [`PlaybackQueue::reclaim`] or the next enqueue.
//!
//! `playing` flips to true on the first enqueue into an empty queue and back to
//! false when the render path drains the last segment. Transitions are recorded
//! as flag bits and announced through a [`Notify`]; an observer awaits
//! [`PlaybackQueue::changed`] and reads them with
//! [`PlaybackQueue::take_transitions`].

use crate::audio;
use crate::error::PlaybackError;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;

const STARTED: u8 = 1;
const DRAINED: u8 = 1 << 1;
const FLUSHED: u8 = 1 << 2;

/// One decoded, playable unit of model audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub item_id: String,
    pub content_index: u32,
    pub samples: Vec<i16>,
    /// Identifies runs of segments that belong to the same content part.
    run: u64,
}

impl AudioSegment {
    pub fn new(item_id: impl Into<String>, content_index: u32, samples: Vec<i16>) -> Self {
        Self {
            item_id: item_id.into(),
            content_index,
            samples,
            run: 0,
        }
    }

    /// Builds a segment from wire PCM16 bytes.
    pub fn from_pcm16(item_id: impl Into<String>, content_index: u32, bytes: &[u8]) -> Self {
        Self::new(item_id, content_index, audio::pcm16_from_bytes(bytes))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        audio::frames_to_ms(self.samples.len() as u64)
    }
}

/// Where playback is: the oldest queued item and how much of it has been heard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub item_id: String,
    pub content_index: u32,
    pub elapsed_ms: u64,
}

/// Transitions recorded since the last [`PlaybackQueue::take_transitions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackTransitions {
    pub started: bool,
    pub drained: bool,
    pub flushed: bool,
    pub segments_finished: u64,
}

impl PlaybackTransitions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct EnqueueSide {
    producer: HeapProd<AudioSegment>,
    spent: HeapCons<AudioSegment>,
    last_key: Option<(String, u32)>,
    run: u64,
}

impl EnqueueSide {
    fn reclaim(&mut self) -> usize {
        let mut freed = 0;
        while self.spent.try_pop().is_some() {
            freed += 1;
        }
        freed
    }
}

struct RenderSide {
    consumer: HeapCons<AudioSegment>,
    spent: HeapProd<AudioSegment>,
    /// Samples of the head segment already rendered.
    offset: usize,
    current_run: Option<u64>,
    /// Samples rendered of the current run.
    run_frames: u64,
}

impl RenderSide {
    fn cursor(&self) -> Option<PlaybackCursor> {
        let head = self.consumer.iter().next()?;
        let frames = if self.current_run == Some(head.run) {
            self.run_frames
        } else {
            0
        };
        Some(PlaybackCursor {
            item_id: head.item_id.clone(),
            content_index: head.content_index,
            elapsed_ms: audio::frames_to_ms(frames),
        })
    }

    fn clear(&mut self) -> usize {
        let mut discarded = 0;
        while self.consumer.try_pop().is_some() {
            discarded += 1;
        }
        self.offset = 0;
        self.current_run = None;
        self.run_frames = 0;
        discarded
    }
}

pub struct PlaybackQueue {
    enqueue: Mutex<EnqueueSide>,
    render: Mutex<RenderSide>,
    playing: AtomicBool,
    queued: AtomicUsize,
    frames_played: AtomicU64,
    capacity: usize,
    transitions: AtomicU8,
    segments_finished: AtomicU64,
    changed: Notify,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (producer, consumer) = HeapRb::<AudioSegment>::new(capacity).split();
        // everything in `spent` passed through the main ring since the last
        // reclaim, so the same capacity holds it
        let (spent_tx, spent_rx) = HeapRb::<AudioSegment>::new(capacity).split();
        Self {
            enqueue: Mutex::new(EnqueueSide {
                producer,
                spent: spent_rx,
                last_key: None,
                run: 0,
            }),
            render: Mutex::new(RenderSide {
                consumer,
                spent: spent_tx,
                offset: 0,
                current_run: None,
                run_frames: 0,
            }),
            playing: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            frames_played: AtomicU64::new(0),
            capacity,
            transitions: AtomicU8::new(0),
            segments_finished: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Segments queued or rendering.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples rendered since creation.
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// Appends a segment to the tail. Starts playback if the queue was empty.
    pub fn enqueue(&self, mut segment: AudioSegment) -> Result<(), PlaybackError> {
        let mut side = self.enqueue.lock();
        side.reclaim();
        let same_run = side
            .last_key
            .as_ref()
            .is_some_and(|(id, idx)| *id == segment.item_id && *idx == segment.content_index);
        let run = if same_run { side.run } else { side.run + 1 };
        segment.run = run;
        let key = (!same_run).then(|| (segment.item_id.clone(), segment.content_index));

        self.queued.fetch_add(1, Ordering::AcqRel);
        if side.producer.try_push(segment).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(PlaybackError::Full {
                capacity: self.capacity,
            });
        }
        side.run = run;
        if let Some(key) = key {
            side.last_key = Some(key);
        }
        drop(side);

        if !self.playing.swap(true, Ordering::AcqRel) {
            self.signal(STARTED);
        }
        Ok(())
    }

    /// Fills `out` with the next samples, padding with silence. Returns the
    /// number of samples taken from queued audio.
    ///
    /// Safe to call from an audio callback: it never blocks, allocates or frees.
    pub fn render(&self, out: &mut [i16]) -> usize {
        let Some(mut guard) = self.render.try_lock() else {
            out.fill(0);
            return 0;
        };
        let RenderSide {
            consumer,
            spent,
            offset,
            current_run,
            run_frames,
        } = &mut *guard;

        let mut written = 0;
        let mut finished = 0;
        while written < out.len() {
            let Some(head) = consumer.iter().next() else {
                break;
            };
            if *current_run != Some(head.run) {
                *current_run = Some(head.run);
                *run_frames = 0;
            }

            let remaining = &head.samples[(*offset).min(head.samples.len())..];
            let n = remaining.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&remaining[..n]);
            written += n;
            *offset += n;
            *run_frames += n as u64;

            if *offset >= head.samples.len() {
                *offset = 0;
                if let Some(segment) = consumer.try_pop() {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    // full only if nobody reclaimed; the segment is then freed here
                    let _ = spent.try_push(segment);
                    finished += 1;
                }
            }
        }
        out[written..].fill(0);
        self.frames_played.fetch_add(written as u64, Ordering::Relaxed);

        let mut bits = 0;
        if consumer.is_empty() && self.playing.swap(false, Ordering::AcqRel) {
            bits |= DRAINED;
        }
        // an enqueue may have landed between the check and the swap
        if !consumer.is_empty() && !self.playing.swap(true, Ordering::AcqRel) {
            bits |= STARTED;
        }
        drop(guard);

        if finished > 0 {
            self.segments_finished.fetch_add(finished, Ordering::AcqRel);
        }
        if finished > 0 || bits != 0 {
            self.signal(bits);
        }
        written
    }

    /// The oldest queued segment's address and the playback time heard of its
    /// content part. `None` when nothing is queued.
    pub fn cursor(&self) -> Option<PlaybackCursor> {
        self.render.lock().cursor()
    }

    pub fn oldest_queued_item_id(&self) -> Option<String> {
        self.cursor().map(|c| c.item_id)
    }

    pub fn current_elapsed_ms(&self) -> u64 {
        self.cursor().map_or(0, |c| c.elapsed_ms)
    }

    /// Drops every queued segment without rendering it. Returns how many were
    /// discarded.
    pub fn flush(&self) -> usize {
        let discarded = {
            let mut side = self.render.lock();
            side.clear()
        };
        self.finish_flush(discarded);
        discarded
    }

    /// Takes the cursor and flushes under one hold of the render lock, so no
    /// samples are rendered between the two.
    pub fn snapshot_and_flush(&self) -> (Option<PlaybackCursor>, usize) {
        let (cursor, discarded) = {
            let mut side = self.render.lock();
            (side.cursor(), side.clear())
        };
        self.finish_flush(discarded);
        (cursor, discarded)
    }

    /// Frees segments the render path has finished with. Returns how many.
    pub fn reclaim(&self) -> usize {
        self.enqueue.lock().reclaim()
    }

    /// Waits until a transition has been recorded. A transition recorded while
    /// nobody waits is not lost: the next call returns at once.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Returns and clears the transitions recorded so far.
    pub fn take_transitions(&self) -> PlaybackTransitions {
        let bits = self.transitions.swap(0, Ordering::AcqRel);
        PlaybackTransitions {
            started: bits & STARTED != 0,
            drained: bits & DRAINED != 0,
            flushed: bits & FLUSHED != 0,
            segments_finished: self.segments_finished.swap(0, Ordering::AcqRel),
        }
    }

    fn finish_flush(&self, discarded: usize) {
        self.queued.fetch_sub(discarded, Ordering::AcqRel);
        let was_playing = self.playing.swap(false, Ordering::AcqRel);
        self.reclaim();
        if was_playing || discarded > 0 {
            self.signal(FLUSHED);
        }
    }

    fn signal(&self, bits: u8) {
        self.transitions.fetch_or(bits, Ordering::AcqRel);
        self.changed.notify_one();
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("capacity", &self.capacity)
            .field("queued", &self.len())
            .field("playing", &self.is_playing())
            .finish()
    }
}
