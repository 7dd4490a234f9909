//! The conversation engine.
//!
//! One [`Conversation`] owns one connection. It runs three tasks:
//!
//! - the receive loop: decodes inbound frames in arrival order, applies them to
//!   the store and feeds audio to the playback queue;
//! - the outbound pump: forwards captured audio from the [`CaptureBridge`];
//! - the playback observer: turns render-path notifications into the
//!   observable `playing` flag.
//!
//! Everything else (session updates, text, interrupts) runs on the caller's
//! task. State changes are published on a `watch` channel, errors and applied
//! events on `broadcast` channels. After [`Conversation::shutdown`] no further
//! state change is published.

use crate::capture::{CaptureBridge, DEFAULT_CHUNK_SAMPLES};
use crate::error::{ConversationError, EngineError};
use crate::interrupt::{InterruptCoordinator, TruncationIntent};
use crate::playback::{AudioSegment, PlaybackQueue};
use crate::store::ConversationStore;
use openai_realtime::{Connection, Connector, Inbound, Transport, TransportError};
use openai_realtime_types::{
    ClientEvent, Item, ItemRole, Message, RateLimit, ResponseConfig, ServerEvent, Session,
    TranscriptionSession, decode_str, encode,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// Observable engine flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineState {
    /// A session has been created and the connection is up.
    pub connected: bool,
    pub listening: bool,
    pub handling_voice: bool,
    /// Model audio is queued or rendering.
    pub playing: bool,
    /// Server VAD reported the user speaking.
    pub user_speaking: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationOptions {
    /// Audio segments the playback queue holds.
    pub playback_capacity: usize,
    /// Captured chunks waiting to be sent.
    pub outbound_capacity: usize,
    /// Samples per input audio append.
    pub chunk_samples: usize,
    /// Backlog of the error and event streams per subscriber.
    pub broadcast_capacity: usize,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            playback_capacity: 512,
            outbound_capacity: 256,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            broadcast_capacity: 256,
        }
    }
}

struct Shared {
    store: RwLock<ConversationStore>,
    transport: Arc<dyn Transport>,
    queue: Arc<PlaybackQueue>,
    interrupt: InterruptCoordinator,
    state: watch::Sender<EngineState>,
    errors: broadcast::Sender<ConversationError>,
    events: broadcast::Sender<ServerEvent>,
    listening: Arc<AtomicBool>,
    handling_voice: AtomicBool,
    /// The inbound stream ended.
    disconnected: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn update_state(&self, f: impl FnOnce(&mut EngineState)) {
        if self.is_closed() {
            return;
        }
        self.state.send_if_modified(|state| {
            let before = *state;
            f(state);
            *state != before
        });
    }

    fn publish_error(&self, error: ConversationError) {
        if self.is_closed() {
            return;
        }
        let _ = self.errors.send(error);
    }

    async fn send(&self, event: ClientEvent) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let frame = encode(&event)?;
        self.transport.send(frame).await?;
        trace!(event_type = event.event_type(), "Sent client event.");
        Ok(())
    }

    fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
        // force a notification so connection waiters re-check
        if !self.is_closed() {
            self.state.send_modify(|state| state.connected = false);
        }
    }

    /// Applies one decoded event. Returns a truncation to send when the event
    /// caused a barge-in.
    fn handle_event(&self, event: ServerEvent) -> Option<TruncationIntent> {
        if self.is_closed() {
            return None;
        }
        let event_type = event.event_type();
        debug!(event_type, event_id = event.event_id(), "Handling server event.");

        if let Err(e) = self.store.write().apply(&event) {
            warn!(event_type, error = %e, "Ignoring event that does not match conversation state.");
            let _ = self.events.send(event);
            return None;
        }

        let mut truncation = None;
        match &event {
            ServerEvent::Error(e) => {
                warn!(error = %e.error, "Server reported an error.");
                self.publish_error(ConversationError::Protocol(e.error.clone()));
            }
            ServerEvent::InputAudioTranscriptionFailed(e) => {
                warn!(item_id = %e.item_id, error = %e.error, "Input transcription failed.");
                self.publish_error(ConversationError::Protocol(e.error.clone()));
            }
            ServerEvent::SessionCreated(e) => {
                info!(session_id = ?e.session.id, "Session created.");
                self.update_state(|s| s.connected = true);
            }
            ServerEvent::TranscriptionSessionCreated(e) => {
                info!(session_id = ?e.session.id, "Transcription session created.");
                self.update_state(|s| s.connected = true);
            }
            ServerEvent::InputAudioBufferSpeechStarted(e) => {
                debug!(audio_start_ms = e.audio_start_ms, "User started speaking.");
                self.update_state(|s| s.user_speaking = true);
                if self.handling_voice.load(Ordering::Acquire) && self.queue.is_playing() {
                    truncation = self.interrupt.interrupt();
                    self.update_state(|s| s.playing = self.queue.is_playing());
                }
            }
            ServerEvent::InputAudioBufferSpeechStopped(_) => {
                self.update_state(|s| s.user_speaking = false);
            }
            ServerEvent::ResponseAudioDelta(e) if self.handling_voice.load(Ordering::Acquire) => {
                let segment = AudioSegment::from_pcm16(&e.item_id, e.content_index, &e.delta);
                if let Err(err) = self.queue.enqueue(segment) {
                    warn!(item_id = %e.item_id, error = %err, "Dropping audio segment.");
                }
            }
            _ => {}
        }

        let _ = self.events.send(event);
        truncation
    }
}

#[instrument(skip_all, name = "receive_loop")]
async fn receive_loop(shared: Arc<Shared>, mut inbound: Inbound) {
    while let Some(frame) = inbound.recv().await {
        if shared.is_closed() {
            break;
        }
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Receive failed; ending receive loop.");
                shared.publish_error(ConversationError::Transport(e.to_string()));
                break;
            }
        };
        let event = match decode_str(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame.");
                continue;
            }
        };
        if let Some(intent) = shared.handle_event(event) {
            info!(item_id = %intent.item_id, audio_end_ms = intent.audio_end_ms, "Barge-in; truncating response.");
            if let Err(e) = shared.send(intent.into()).await {
                warn!(error = %e, "Failed to send truncation.");
                shared.publish_error(ConversationError::Transport(e.to_string()));
            }
        }
    }
    debug!("Receive loop finished.");
}

async fn outbound_pump(shared: Arc<Shared>, mut outbound: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = outbound.recv().await {
        if let Err(e) = shared.send(event).await {
            if shared.is_closed() {
                break;
            }
            warn!(error = %e, "Failed to send captured audio.");
            shared.publish_error(ConversationError::Transport(e.to_string()));
        }
    }
}

/// Frees finished audio off the output thread and mirrors `playing` into the
/// engine state.
async fn playback_observer(shared: Arc<Shared>) {
    loop {
        shared.queue.changed().await;
        let freed = shared.queue.reclaim();
        let transitions = shared.queue.take_transitions();
        trace!(?transitions, freed, "Playback transitions.");
        shared.update_state(|s| s.playing = shared.queue.is_playing());
    }
}

pub struct Conversation {
    shared: Arc<Shared>,
    capture: CaptureBridge,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Conversation {
    /// Opens a connection and starts the engine on it.
    pub async fn connect(connector: &dyn Connector, options: ConversationOptions) -> Result<Self, EngineError> {
        let connection = connector.connect().await?;
        Ok(Self::new(connection, options))
    }

    /// Starts the engine on an established connection. Must be called within a
    /// Tokio runtime.
    pub fn new(connection: Connection, options: ConversationOptions) -> Self {
        let Connection {
            transport,
            mut inbound,
        } = connection;

        let queue = Arc::new(PlaybackQueue::new(options.playback_capacity));
        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let (state, _) = watch::channel(EngineState::default());
        let broadcast_capacity = options.broadcast_capacity.max(1);
        let listening = Arc::new(AtomicBool::new(false));

        let shared = Arc::new(Shared {
            store: RwLock::new(ConversationStore::new()),
            transport,
            interrupt: InterruptCoordinator::new(queue.clone()),
            queue,
            state,
            errors: broadcast::channel(broadcast_capacity).0,
            events: broadcast::channel(broadcast_capacity).0,
            listening: listening.clone(),
            handling_voice: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        inbound.on_disconnect(move || {
            if let Some(shared) = weak.upgrade() {
                info!("Realtime connection ended.");
                shared.mark_disconnected();
            }
        });

        let capture = CaptureBridge::new(outbound_tx, listening).with_chunk_samples(options.chunk_samples);
        let tasks = vec![
            tokio::spawn(receive_loop(shared.clone(), inbound)),
            tokio::spawn(outbound_pump(shared.clone(), outbound_rx)),
            tokio::spawn(playback_observer(shared.clone())),
        ];

        Self {
            shared,
            capture,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    pub fn errors(&self) -> broadcast::Receiver<ConversationError> {
        self.shared.errors.subscribe()
    }

    /// Every server event after it has been applied, in arrival order.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().connected
    }

    /// Waits until the server has created the session.
    pub async fn wait_for_connection(&self) -> Result<(), EngineError> {
        if self.shared.is_closed() {
            return Err(EngineError::Closed);
        }
        let mut rx = self.state();
        let shared = &self.shared;
        let state = rx
            .wait_for(|s| s.connected || shared.disconnected.load(Ordering::Acquire))
            .await
            .map_err(|_| EngineError::Closed)?;
        if state.connected {
            Ok(())
        } else {
            Err(EngineError::Transport(TransportError::Closed))
        }
    }

    pub fn items(&self) -> Vec<Item> {
        self.shared.store.read().items().to_vec()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.store.read().messages().cloned().collect()
    }

    pub fn item(&self, id: &str) -> Option<Item> {
        self.shared.store.read().item(id).cloned()
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.store.read().session().cloned()
    }

    pub fn transcription_session(&self) -> Option<TranscriptionSession> {
        self.shared.store.read().transcription_session().cloned()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.shared.store.read().conversation_id().map(str::to_string)
    }

    pub fn rate_limits(&self) -> Vec<RateLimit> {
        self.shared.store.read().rate_limits().to_vec()
    }

    /// The render source for the audio output device.
    pub fn playback_queue(&self) -> Arc<PlaybackQueue> {
        self.shared.queue.clone()
    }

    /// The sink for captured microphone frames.
    pub fn capture_bridge(&self) -> CaptureBridge {
        self.capture.clone()
    }

    /// Edits a copy of the current session and submits it. The local session
    /// changes only when the server confirms with `session.updated`.
    pub async fn update_session(&self, edit: impl FnOnce(&mut Session)) -> Result<(), EngineError> {
        let mut session = self.session().ok_or(EngineError::SessionNotFound)?;
        edit(&mut session);
        self.set_session(session).await
    }

    pub async fn set_session(&self, mut session: Session) -> Result<(), EngineError> {
        // the server rejects updates that carry the session id
        session.id = None;
        self.send(ClientEvent::update_session(session)).await
    }

    pub async fn set_transcription_session(&self, mut session: TranscriptionSession) -> Result<(), EngineError> {
        session.id = None;
        self.send(ClientEvent::update_transcription_session(session)).await
    }

    /// Sends a raw client event.
    pub async fn send(&self, event: ClientEvent) -> Result<(), EngineError> {
        self.shared.send(event).await
    }

    /// Appends PCM16 audio to the input buffer, optionally committing it.
    pub async fn send_audio(&self, audio: Vec<u8>, commit: bool) -> Result<(), EngineError> {
        self.send(ClientEvent::append_input_audio(audio)).await?;
        if commit {
            self.commit_audio().await?;
        }
        Ok(())
    }

    pub async fn commit_audio(&self) -> Result<(), EngineError> {
        self.send(ClientEvent::commit_input_audio()).await
    }

    pub async fn clear_audio(&self) -> Result<(), EngineError> {
        self.send(ClientEvent::clear_input_audio()).await
    }

    /// Sends a text message and asks for a response. Playback is interrupted
    /// first when voice is handled.
    pub async fn send_text(
        &self,
        role: ItemRole,
        text: impl Into<String>,
        response: Option<ResponseConfig>,
    ) -> Result<(), EngineError> {
        if self.shared.handling_voice.load(Ordering::Acquire) {
            if let Err(e) = self.interrupt_speech().await {
                warn!(error = %e, "Failed to send truncation before text message.");
            }
        }
        self.send(ClientEvent::create_item(Item::text_message(role, text))).await?;
        self.create_response(response).await
    }

    pub async fn send_function_output(
        &self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.send(ClientEvent::create_item(Item::function_output(call_id, output)))
            .await
    }

    pub async fn create_response(&self, config: Option<ResponseConfig>) -> Result<(), EngineError> {
        self.send(ClientEvent::create_response(config)).await
    }

    pub async fn cancel_response(&self) -> Result<(), EngineError> {
        self.send(ClientEvent::cancel_response()).await
    }

    /// Stops model playback and tells the server how much was heard.
    ///
    /// The queue is flushed even if the truncation cannot be sent.
    pub async fn interrupt_speech(&self) -> Result<Option<TruncationIntent>, EngineError> {
        let intent = self.shared.interrupt.interrupt();
        self.shared
            .update_state(|s| s.playing = self.shared.queue.is_playing());
        let Some(intent) = intent else {
            return Ok(None);
        };
        info!(item_id = %intent.item_id, audio_end_ms = intent.audio_end_ms, "Interrupting response.");
        self.send(intent.clone().into()).await?;
        Ok(Some(intent))
    }

    /// Model audio deltas are queued for playback from now on.
    pub fn start_handling_voice(&self) {
        self.shared.handling_voice.store(true, Ordering::Release);
        self.shared.update_state(|s| s.handling_voice = true);
    }

    /// Stops listening and drops any queued playback.
    pub fn stop_handling_voice(&self) {
        self.shared.listening.store(false, Ordering::Release);
        self.shared.handling_voice.store(false, Ordering::Release);
        self.shared.queue.flush();
        self.shared.update_state(|s| {
            s.listening = false;
            s.handling_voice = false;
            s.playing = false;
        });
    }

    /// Captured frames are forwarded from now on. Implies handling voice.
    pub fn start_listening(&self) {
        if !self.shared.handling_voice.load(Ordering::Acquire) {
            self.start_handling_voice();
        }
        self.shared.listening.store(true, Ordering::Release);
        self.shared.update_state(|s| s.listening = true);
    }

    /// Stops forwarding captured frames. Playback continues.
    pub fn stop_listening(&self) {
        self.shared.listening.store(false, Ordering::Release);
        self.shared.update_state(|s| s.listening = false);
    }

    /// Stops the engine: no further state changes are published, queued audio
    /// is dropped and the transport is closed.
    pub async fn shutdown(&self) {
        if self.close_local() {
            if let Err(e) = self.shared.transport.close().await {
                debug!(error = %e, "Transport close failed.");
            }
            info!("Conversation shut down.");
        }
    }

    /// Returns false if the engine was already closed.
    fn close_local(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.listening.store(false, Ordering::Release);
        self.shared.queue.flush();
        true
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.close_local();
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("state", &*self.shared.state.borrow())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}
