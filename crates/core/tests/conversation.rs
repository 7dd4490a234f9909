use openai_realtime::channel::{self, Peer};
use openai_realtime_types::{ClientEvent, ContentPart, Item, ItemRole, ServerEvent};
use parley_core::{Conversation, ConversationError, ConversationOptions, audio};
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

fn start() -> (Conversation, Peer) {
    let (connection, peer) = channel::pair();
    (Conversation::new(connection, ConversationOptions::default()), peer)
}

async fn push(peer: &Peer, value: Value) {
    peer.push(value.to_string()).await.unwrap();
}

/// Pushes `frames` and waits until the engine has applied the last one.
async fn feed(conversation: &Conversation, peer: &Peer, frames: Vec<Value>) {
    let mut events = conversation.events();
    let count = frames.len();
    for frame in frames {
        push(peer, frame).await;
    }
    for _ in 0..count {
        within(events.recv()).await.unwrap();
    }
}

fn session_created() -> Value {
    json!({
        "type": "session.created",
        "event_id": "ev_0",
        "session": {
            "id": "sess_1",
            "model": "gpt-4o-realtime-preview",
            "modalities": ["text", "audio"],
            "voice": "alloy"
        }
    })
}

fn assistant_item(id: &str) -> Value {
    json!({
        "type": "conversation.item.created",
        "item": { "id": id, "type": "message", "role": "assistant", "content": [] }
    })
}

fn audio_part(item_id: &str) -> Value {
    json!({
        "type": "response.content_part.added",
        "response_id": "resp_1",
        "item_id": item_id,
        "output_index": 0,
        "content_index": 0,
        "part": { "type": "audio", "transcript": "" }
    })
}

fn audio_delta(item_id: &str, ms: u64) -> Value {
    let mut event: ServerEvent = serde_json::from_value(json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": item_id,
        "output_index": 0,
        "content_index": 0,
        "delta": ""
    }))
    .unwrap();
    if let ServerEvent::ResponseAudioDelta(delta) = &mut event {
        delta.delta = vec![0; audio::ms_to_bytes(ms) as usize];
    }
    serde_json::to_value(&event).unwrap()
}

#[tokio::test]
async fn test_text_response_is_assembled() {
    let (conversation, peer) = start();
    feed(
        &conversation,
        &peer,
        vec![
            session_created(),
            json!({ "type": "conversation.created", "conversation": { "id": "conv_1" } }),
            assistant_item("msg1"),
            json!({
                "type": "response.content_part.added",
                "response_id": "resp_1",
                "item_id": "msg1",
                "output_index": 0,
                "content_index": 0,
                "part": { "type": "text", "text": "" }
            }),
            json!({
                "type": "response.text.delta",
                "response_id": "resp_1",
                "item_id": "msg1",
                "output_index": 0,
                "content_index": 0,
                "delta": "Hel"
            }),
            json!({
                "type": "response.text.delta",
                "response_id": "resp_1",
                "item_id": "msg1",
                "output_index": 0,
                "content_index": 0,
                "delta": "lo"
            }),
            json!({
                "type": "response.text.done",
                "response_id": "resp_1",
                "item_id": "msg1",
                "output_index": 0,
                "content_index": 0,
                "text": "Hello!"
            }),
        ],
    )
    .await;

    within(conversation.wait_for_connection()).await.unwrap();
    assert!(conversation.is_connected());
    assert_eq!(conversation.conversation_id().as_deref(), Some("conv_1"));
    assert_eq!(
        conversation.session().and_then(|s| s.id),
        Some("sess_1".to_string())
    );
    let messages = conversation.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, vec![ContentPart::text("Hello!")]);
}

#[tokio::test]
async fn test_unknown_event_leaves_state_unchanged() {
    let (conversation, peer) = start();
    feed(&conversation, &peer, vec![assistant_item("msg1")]).await;

    push(&peer, json!({ "type": "future.event.v2", "payload": { "x": 1 } })).await;
    push(&peer, json!({ "type": "response.audio.delta", "delta": "%%%" })).await;
    feed(&conversation, &peer, vec![assistant_item("msg2")]).await;

    let ids: Vec<_> = conversation
        .items()
        .iter()
        .filter_map(|item| item.id().map(str::to_string))
        .collect();
    assert_eq!(ids, vec!["msg1", "msg2"]);
    assert!(conversation.playback_queue().is_empty());
}

#[tokio::test]
async fn test_barge_in_truncates_heard_audio() {
    let (conversation, mut peer) = start();
    let mut state = conversation.state();
    conversation.start_handling_voice();
    feed(
        &conversation,
        &peer,
        vec![
            session_created(),
            assistant_item("msg1"),
            audio_part("msg1"),
            audio_delta("msg1", 3000),
        ],
    )
    .await;
    within(state.wait_for(|s| s.playing)).await.unwrap();

    // the output device renders 1.2 s
    let queue = conversation.playback_queue();
    let mut out = vec![0i16; audio::ms_to_frames(1200) as usize];
    assert_eq!(queue.render(&mut out), out.len());

    feed(
        &conversation,
        &peer,
        vec![json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 1000,
            "item_id": "user1"
        })],
    )
    .await;

    let sent = within(peer.next_sent_event()).await;
    assert_eq!(sent, Some(ClientEvent::truncate_item("msg1", 0, 1200)));
    assert!(queue.is_empty());
    within(state.wait_for(|s| s.user_speaking && !s.playing))
        .await
        .unwrap();

    // no audio left, so a second interrupt sends nothing
    assert_eq!(conversation.interrupt_speech().await.unwrap(), None);
    assert!(peer.try_next_sent().is_none());

    feed(
        &conversation,
        &peer,
        vec![json!({
            "type": "input_audio_buffer.speech_stopped",
            "audio_end_ms": 2000,
            "item_id": "user1"
        })],
    )
    .await;
    assert!(!conversation.state().borrow().user_speaking);
}

#[tokio::test]
async fn test_speech_without_playback_sends_nothing() {
    let (conversation, mut peer) = start();
    conversation.start_handling_voice();
    feed(
        &conversation,
        &peer,
        vec![json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 0,
            "item_id": "user1"
        })],
    )
    .await;
    assert!(peer.try_next_sent().is_none());
    assert!(conversation.state().borrow().user_speaking);
}

#[tokio::test]
async fn test_update_session_sends_full_session_without_id() {
    let (conversation, mut peer) = start();
    feed(&conversation, &peer, vec![session_created()]).await;

    conversation
        .update_session(|session| session.instructions = Some("Be brief.".into()))
        .await
        .unwrap();

    let Some(ClientEvent::SessionUpdate { session, .. }) = within(peer.next_sent_event()).await else {
        panic!("expected a session update");
    };
    assert_eq!(session.id, None);
    assert_eq!(session.instructions.as_deref(), Some("Be brief."));
    assert_eq!(session.model.as_deref(), Some("gpt-4o-realtime-preview"));
    // the local session only changes once the server confirms
    assert_eq!(conversation.session().and_then(|s| s.instructions), None);
}

#[tokio::test]
async fn test_send_text_creates_item_then_response() {
    let (conversation, mut peer) = start();
    conversation
        .send_text(ItemRole::User, "What's the weather?", None)
        .await
        .unwrap();

    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::create_item(Item::text_message(
            ItemRole::User,
            "What's the weather?"
        )))
    );
    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::create_response(None))
    );
}

#[tokio::test]
async fn test_send_text_interrupts_playback_first() {
    let (conversation, mut peer) = start();
    conversation.start_handling_voice();
    feed(
        &conversation,
        &peer,
        vec![assistant_item("msg1"), audio_part("msg1"), audio_delta("msg1", 500)],
    )
    .await;
    let mut out = vec![0i16; audio::ms_to_frames(100) as usize];
    conversation.playback_queue().render(&mut out);

    conversation.send_text(ItemRole::User, "stop", None).await.unwrap();
    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::truncate_item("msg1", 0, 100))
    );
    assert!(matches!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::ConversationItemCreate { .. })
    ));
}

#[tokio::test]
async fn test_function_output_and_audio_commit() {
    let (conversation, mut peer) = start();
    conversation
        .send_function_output("call_1", r#"{"temp":21}"#)
        .await
        .unwrap();
    conversation.send_audio(vec![1, 0, 2, 0], true).await.unwrap();

    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::create_item(Item::function_output(
            "call_1",
            r#"{"temp":21}"#
        )))
    );
    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::append_input_audio(vec![1, 0, 2, 0]))
    );
    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::commit_input_audio())
    );
}

#[tokio::test]
async fn test_captured_audio_is_forwarded_while_listening() {
    let (conversation, mut peer) = start();
    let bridge = conversation.capture_bridge();

    assert_eq!(bridge.on_captured_frame(&[1, 2, 3]), 0);

    conversation.start_listening();
    assert_eq!(bridge.on_captured_frame(&[1, 2, 3]), 1);
    assert_eq!(
        within(peer.next_sent_event()).await,
        Some(ClientEvent::append_input_audio(audio::pcm16_to_bytes(&[1, 2, 3])))
    );
}

#[tokio::test]
async fn test_server_errors_are_published() {
    let (conversation, peer) = start();
    let mut errors = conversation.errors();
    push(
        &peer,
        json!({
            "type": "error",
            "event_id": "ev_9",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_value",
                "message": "Invalid value for 'audio_end_ms'"
            }
        }),
    )
    .await;

    let ConversationError::Protocol(error) = within(errors.recv()).await.unwrap() else {
        panic!("expected a protocol error");
    };
    assert_eq!(error.code.as_deref(), Some("invalid_value"));
}

#[tokio::test]
async fn test_disconnect_flips_connected() {
    let (conversation, mut peer) = start();
    feed(&conversation, &peer, vec![session_created()]).await;
    let mut state = conversation.state();
    assert!(state.borrow().connected);

    peer.disconnect();
    within(state.wait_for(|s| !s.connected)).await.unwrap();
}

#[tokio::test]
async fn test_wait_for_connection_fails_when_stream_ends() {
    let (conversation, mut peer) = start();
    peer.disconnect();
    assert!(within(conversation.wait_for_connection()).await.is_err());
}

#[tokio::test]
async fn test_shutdown_closes_transport() {
    let (conversation, peer) = start();
    conversation.shutdown().await;
    assert!(peer.is_closed());
    assert!(conversation.send(ClientEvent::cancel_response()).await.is_err());
}
