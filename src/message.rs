//! Message protocol definitions
//!
//! JSON envelope protocol: `{"type": "TextMessage" | "SeenMessage" |
//! "DeleteMessage", "data": <payload>}`. Inbound frames are decoded in two
//! steps (envelope, then the payload for its type) so an unknown type can be
//! reported separately from a malformed payload.
//!
//! Clients only ever supply content and target ids. Identity fields are
//! filled in server-side by [`ClientEvent::authored_by`], and ids and
//! timestamps are assigned by the room actor.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{MessageId, RoomId, UserId};

/// Envelope `type` discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    TextMessage,
    SeenMessage,
    DeleteMessage,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::TextMessage => "TextMessage",
            MessageType::SeenMessage => "SeenMessage",
            MessageType::DeleteMessage => "DeleteMessage",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TextMessage" => Ok(MessageType::TextMessage),
            "SeenMessage" => Ok(MessageType::SeenMessage),
            "DeleteMessage" => Ok(MessageType::DeleteMessage),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media attached to a text message (stored elsewhere, referenced by URL)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedMedia {
    pub content_type: String,
    pub url: String,
}

/// A chat message as persisted and broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_media: Option<EmbeddedMedia>,
    pub chat_room_id: RoomId,
    pub sent_by: UserId,
    pub sent_at: DateTime<Utc>,
    /// Insertion-ordered set; always starts with the sender
    pub seen_by: Vec<UserId>,
}

impl Message {
    /// Add `user` to `seen_by`
    ///
    /// Returns false when the user was already present.
    pub fn mark_seen(&mut self, user: &UserId) -> bool {
        if self.seen_by.contains(user) {
            return false;
        }
        self.seen_by.push(user.clone());
        true
    }
}

/// Seen receipt broadcast to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenMessage {
    pub message_id: MessageId,
    pub seen_by: UserId,
}

/// Deletion notice broadcast to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub message_id: MessageId,
    pub sent_by: UserId,
}

/// A text message that has an author but no id or timestamp yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDraft {
    pub content: String,
    pub embedded_media: Option<EmbeddedMedia>,
    pub sent_by: UserId,
}

/// Inbound frame as sent by the client, before identity stamping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Text {
        content: String,
        embedded_media: Option<EmbeddedMedia>,
    },
    Seen {
        message_id: MessageId,
    },
    Delete {
        message_id: MessageId,
    },
}

/// Inbound event with the connection's identity applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Text(TextDraft),
    Seen(SeenMessage),
    Delete(DeleteMessage),
}

impl ClientEvent {
    /// Attach the authenticated identity of the sending connection
    pub fn authored_by(self, user: UserId) -> ChatEvent {
        match self {
            ClientEvent::Text {
                content,
                embedded_media,
            } => ChatEvent::Text(TextDraft {
                content,
                embedded_media,
                sent_by: user,
            }),
            ClientEvent::Seen { message_id } => ChatEvent::Seen(SeenMessage {
                message_id,
                seen_by: user,
            }),
            ClientEvent::Delete { message_id } => ChatEvent::Delete(DeleteMessage {
                message_id,
                sent_by: user,
            }),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

// Only the client-controlled fields. Anything else in `data` (id, sentBy,
// seenBy, sentAt) is ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextPayload {
    content: String,
    #[serde(default)]
    embedded_media: Option<EmbeddedMedia>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptPayload {
    message_id: MessageId,
}

/// Decode one inbound text frame
pub fn decode(frame: &str) -> Result<ClientEvent, ProtocolError> {
    let envelope: RawEnvelope = serde_json::from_str(frame)?;
    let kind: MessageType = envelope.kind.parse()?;

    let event = match kind {
        MessageType::TextMessage => {
            let payload: TextPayload = serde_json::from_value(envelope.data)?;
            ClientEvent::Text {
                content: payload.content,
                embedded_media: payload.embedded_media,
            }
        }
        MessageType::SeenMessage => {
            let payload: ReceiptPayload = serde_json::from_value(envelope.data)?;
            ClientEvent::Seen {
                message_id: payload.message_id,
            }
        }
        MessageType::DeleteMessage => {
            let payload: ReceiptPayload = serde_json::from_value(envelope.data)?;
            ClientEvent::Delete {
                message_id: payload.message_id,
            }
        }
    };
    Ok(event)
}

/// Payloads the server writes to clients, each tied to one envelope type
pub trait Outbound: Serialize {
    const KIND: MessageType;
}

impl Outbound for Message {
    const KIND: MessageType = MessageType::TextMessage;
}

impl Outbound for SeenMessage {
    const KIND: MessageType = MessageType::SeenMessage;
}

impl Outbound for DeleteMessage {
    const KIND: MessageType = MessageType::DeleteMessage;
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    #[serde(rename = "type")]
    kind: MessageType,
    data: &'a T,
}

/// Encode an outbound payload into a text frame
pub fn encode<T: Outbound>(payload: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        kind: T::KIND,
        data: payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            id: MessageId::new("m1"),
            content: "hi".to_string(),
            embedded_media: None,
            chat_room_id: RoomId::new("R1"),
            sent_by: UserId::new("alice"),
            sent_at: Utc::now(),
            seen_by: vec![UserId::new("alice")],
        }
    }

    #[test]
    fn test_decode_text_ignores_client_identity_fields() {
        let json = r#"{"type": "TextMessage", "data": {
            "id": "forged-id",
            "content": "hello",
            "sentBy": "mallory",
            "seenBy": ["mallory"],
            "sentAt": "2001-01-01T00:00:00Z"
        }}"#;
        let event = decode(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Text {
                content: "hello".to_string(),
                embedded_media: None,
            }
        );

        match event.authored_by(UserId::new("alice")) {
            ChatEvent::Text(draft) => assert_eq!(draft.sent_by, UserId::new("alice")),
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_text_with_media() {
        let json = r#"{"type":"TextMessage","data":{"content":"look","embeddedMedia":{"contentType":"image/png","url":"http://x/1.png"}}}"#;
        match decode(json).unwrap() {
            ClientEvent::Text { embedded_media, .. } => {
                let media = embedded_media.unwrap();
                assert_eq!(media.content_type, "image/png");
                assert_eq!(media.url, "http://x/1.png");
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_seen_stamps_reader() {
        let json = r#"{"type":"SeenMessage","data":{"messageId":"m1","seenBy":"mallory"}}"#;
        let event = decode(json).unwrap().authored_by(UserId::new("bob"));
        assert_eq!(
            event,
            ChatEvent::Seen(SeenMessage {
                message_id: MessageId::new("m1"),
                seen_by: UserId::new("bob"),
            })
        );
    }

    #[test]
    fn test_decode_delete() {
        let json = r#"{"type":"DeleteMessage","data":{"messageId":"m1"}}"#;
        assert_eq!(
            decode(json).unwrap(),
            ClientEvent::Delete {
                message_id: MessageId::new("m1")
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(r#"{"type":"Typing","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "Typing"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
        // known type, payload missing its required field
        assert!(matches!(
            decode(r#"{"type":"SeenMessage","data":{}}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_encode_text_envelope() {
        let json = encode(&sample_message()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "TextMessage");
        assert_eq!(value["data"]["sentBy"], "alice");
        assert_eq!(value["data"]["chatRoomId"], "R1");
        assert_eq!(value["data"]["seenBy"][0], "alice");
        assert!(value["data"].get("embeddedMedia").is_none());
    }

    #[test]
    fn test_encode_receipts() {
        let seen = SeenMessage {
            message_id: MessageId::new("m1"),
            seen_by: UserId::new("bob"),
        };
        let json = encode(&seen).unwrap();
        assert!(json.contains("\"type\":\"SeenMessage\""));
        assert!(json.contains("\"messageId\":\"m1\""));

        let delete = DeleteMessage {
            message_id: MessageId::new("m1"),
            sent_by: UserId::new("alice"),
        };
        assert!(encode(&delete).unwrap().contains("\"type\":\"DeleteMessage\""));
    }

    #[test]
    fn test_mark_seen_is_idempotent() {
        let mut message = sample_message();
        assert!(message.mark_seen(&UserId::new("bob")));
        assert!(!message.mark_seen(&UserId::new("bob")));
        assert!(!message.mark_seen(&UserId::new("alice")));
        assert_eq!(message.seen_by, vec![UserId::new("alice"), UserId::new("bob")]);
    }
}
