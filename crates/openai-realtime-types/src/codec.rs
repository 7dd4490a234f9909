//! Frame codec: raw wire text to [`ServerEvent`], [`ClientEvent`] to wire text.
//!
//! Decoding reads the `type` discriminant first. A discriminant this crate does
//! not know is reported as [`DecodeError::UnknownType`] without attempting a
//! typed decode, so new server event kinds never look like corrupt data. Any
//! other failure, including a bad base64 audio payload, is scoped to the one
//! frame it came from.

use crate::client_event::ClientEvent;
use crate::server_event::ServerEvent;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame has no `type` discriminant")]
    MissingType,
    #[error("unknown server event type: {0}")]
    UnknownType(String),
    #[error("malformed `{event_type}` event: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame is not a JSON object: {0}")]
    NotJson(#[source] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode `{event_type}` event: {source}")]
pub struct EncodeError {
    pub event_type: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

/// Decodes one inbound frame.
pub fn decode(bytes: &[u8]) -> Result<ServerEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(DecodeError::NotJson)?;
    let event_type = envelope.event_type.ok_or(DecodeError::MissingType)?;
    if !ServerEvent::is_known_type(&event_type) {
        return Err(DecodeError::UnknownType(event_type));
    }
    serde_json::from_slice(bytes).map_err(|source| DecodeError::Malformed {
        event_type,
        source,
    })
}

pub fn decode_str(text: &str) -> Result<ServerEvent, DecodeError> {
    decode(text.as_bytes())
}

/// Encodes one outbound intent as a text frame.
pub fn encode(event: &ClientEvent) -> Result<String, EncodeError> {
    serde_json::to_string(event).map_err(|source| EncodeError {
        event_type: event.event_type(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ContentPart, Item, ItemRole};
    use serde_json::json;

    #[test]
    fn test_decode_audio_delta_decodes_base64() {
        let frame = json!({
            "type": "response.audio.delta",
            "event_id": "ev_1",
            "response_id": "resp_1",
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "delta": "AAEC"
        })
        .to_string();

        let event = decode_str(&frame).unwrap();
        let ServerEvent::ResponseAudioDelta(delta) = event else {
            panic!("expected an audio delta");
        };
        assert_eq!(delta.delta, vec![0x00, 0x01, 0x02]);
        assert_eq!(delta.item_id, "item_1");
    }

    #[test]
    fn test_decode_unknown_type() {
        let frame = br#"{"type":"future.event.v2","event_id":"ev_9","payload":{}}"#;
        match decode(frame) {
            Err(DecodeError::UnknownType(t)) => assert_eq!(t, "future.event.v2"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bad_base64_is_scoped_to_event() {
        let frame = json!({
            "type": "response.audio.delta",
            "response_id": "resp_1",
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "delta": "%%not base64%%"
        })
        .to_string();

        match decode_str(&frame) {
            Err(DecodeError::Malformed { event_type, source }) => {
                assert_eq!(event_type, "response.audio.delta");
                assert!(source.to_string().contains("base64"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }

        // the next frame decodes normally
        let next = r#"{"type":"input_audio_buffer.cleared","event_id":"ev_2"}"#;
        assert!(matches!(decode_str(next), Ok(ServerEvent::InputAudioBufferCleared(_))));
    }

    #[test]
    fn test_decode_missing_type_and_garbage() {
        assert!(matches!(decode(br#"{"event_id":"x"}"#), Err(DecodeError::MissingType)));
        assert!(matches!(decode(b"not json"), Err(DecodeError::NotJson(_))));
    }

    #[test]
    fn test_decode_missing_required_field_is_malformed() {
        let frame = r#"{"type":"conversation.item.deleted","event_id":"ev_3"}"#;
        assert!(matches!(
            decode_str(frame),
            Err(DecodeError::Malformed { ref event_type, .. }) if event_type == "conversation.item.deleted"
        ));
    }

    #[test]
    fn test_decode_error_event() {
        let frame = json!({
            "type": "error",
            "event_id": "ev_4",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_value",
                "message": "Invalid value for 'audio_end_ms'",
                "param": null,
                "event_id": "client_ev_1"
            }
        })
        .to_string();

        let ServerEvent::Error(event) = decode_str(&frame).unwrap() else {
            panic!("expected an error event");
        };
        assert_eq!(event.error.code.as_deref(), Some("invalid_value"));
        assert_eq!(event.error.event_id.as_deref(), Some("client_ev_1"));
        assert_eq!(
            event.error.to_string(),
            "invalid_request_error: Invalid value for 'audio_end_ms'"
        );
    }

    #[test]
    fn test_encode_truncate_intent() {
        let encoded = encode(&ClientEvent::truncate_item("item_1", 0, 1200)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.truncate",
                "item_id": "item_1",
                "content_index": 0,
                "audio_end_ms": 1200
            })
        );
    }

    #[test]
    fn test_encode_audio_append_and_item_create() {
        let encoded = encode(&ClientEvent::append_input_audio(vec![1, 2, 3])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({ "type": "input_audio_buffer.append", "audio": "AQID" }));

        let item = Item::text_message(ItemRole::User, "hi");
        let encoded = encode(&ClientEvent::create_item(item)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["content"][0], serde_json::to_value(ContentPart::input_text("hi")).unwrap());
        assert!(value.get("previous_item_id").is_none());
    }

    #[test]
    fn test_encode_response_create_without_config() {
        let encoded = encode(&ClientEvent::create_response(None)).unwrap();
        assert_eq!(encoded, r#"{"type":"response.create"}"#);
    }
}
