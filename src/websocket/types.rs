use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    events::MessageCreatedEvent,
    identity::{Identity, Role},
};

/// A chat message frame from a client.
///
/// Field names follow the wire protocol, which is camelCase JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub from_user_id: String,
    pub to_user_id: String,
    pub conversation_id: String,
    pub message_body: String,
    pub sender_type: Role,
}

/// A control frame from a client. Currently only `MARK_AS_SEEN`.
#[derive(Debug, Clone)]
pub enum ControlFrame {
    MarkAsSeen { conversation_id: String },
}

/// Every inbound text frame parses to exactly one of these.
///
/// Registration frames are bare identity strings rather than JSON, so
/// discrimination starts from whether the text is a JSON object at
/// all. `Malformed` carries the reason for the drop log — malformed
/// frames never close the connection.
#[derive(Debug)]
pub enum Frame {
    Registration(Identity),
    Chat(ChatFrame),
    Control(ControlFrame),
    Malformed(String),
}

/// Parse one inbound text frame. Pure: no I/O, no connection state.
pub fn parse_frame(text: &str) -> Frame {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => parse_structured(obj),
        // Bare numeric user ids ("2") happen to be valid JSON numbers,
        // and some clients quote the identity string.
        Ok(Value::Number(n)) => parse_registration(&n.to_string()),
        Ok(Value::String(s)) => parse_registration(&s),
        Ok(other) => Frame::Malformed(format!("Unexpected JSON frame: {}", other)),
        // Not JSON at all: the bare registration string.
        Err(_) => parse_registration(text),
    }
}

fn parse_registration(raw: &str) -> Frame {
    match Identity::parse(raw) {
        Some(identity) => Frame::Registration(identity),
        None => Frame::Malformed(format!("Invalid registration identity: {:?}", raw)),
    }
}

fn parse_structured(obj: serde_json::Map<String, Value>) -> Frame {
    if obj.get("type").and_then(Value::as_str) == Some("MARK_AS_SEEN") {
        return match obj.get("conversationId").and_then(Value::as_str) {
            Some(conversation_id) if !conversation_id.is_empty() => {
                Frame::Control(ControlFrame::MarkAsSeen {
                    conversation_id: conversation_id.to_string(),
                })
            }
            _ => Frame::Malformed("MARK_AS_SEEN without conversationId".to_string()),
        };
    }

    match serde_json::from_value::<ChatFrame>(Value::Object(obj)) {
        Ok(frame) => {
            if frame.to_user_id.is_empty()
                || frame.conversation_id.is_empty()
                || frame.message_body.is_empty()
            {
                Frame::Malformed("Chat frame with empty required field".to_string())
            } else {
                Frame::Chat(frame)
            }
        }
        Err(e) => Frame::Malformed(format!("Invalid chat frame: {}", e)),
    }
}

/// Server-to-client push frames: `{type, payload}` envelopes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage(MessageCreatedEvent),
    #[serde(rename = "UNSEEN_COUNT_UPDATE")]
    UnseenCountUpdate(UnseenCountPayload),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnseenCountPayload {
    pub conversation_id: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn bare_string_parses_as_registration() {
        match parse_frame("seller_2") {
            Frame::Registration(identity) => {
                assert_eq!(identity.role, Role::Seller);
                assert_eq!(identity.id, "2");
            }
            other => panic!("expected registration, got {:?}", other),
        }
    }

    #[test]
    fn numeric_identity_parses_as_registration() {
        // "1" is valid JSON, but it is still a registration frame.
        match parse_frame("1") {
            Frame::Registration(identity) => {
                assert_eq!(identity.role, Role::User);
                assert_eq!(identity.id, "1");
            }
            other => panic!("expected registration, got {:?}", other),
        }
    }

    #[test]
    fn valid_chat_frame_parses() {
        let text = r#"{"fromUserId":"1","toUserId":"2","conversationId":"c1","messageBody":"hi","senderType":"user"}"#;
        match parse_frame(text) {
            Frame::Chat(frame) => {
                assert_eq!(frame.from_user_id, "1");
                assert_eq!(frame.to_user_id, "2");
                assert_eq!(frame.conversation_id, "c1");
                assert_eq!(frame.message_body, "hi");
                assert_eq!(frame.sender_type, Role::User);
            }
            other => panic!("expected chat frame, got {:?}", other),
        }
    }

    #[test]
    fn chat_frame_with_empty_body_is_malformed() {
        let text = r#"{"fromUserId":"1","toUserId":"2","conversationId":"c1","messageBody":"","senderType":"user"}"#;
        assert!(matches!(parse_frame(text), Frame::Malformed(_)));
    }

    #[test]
    fn chat_frame_missing_recipient_is_malformed() {
        let text = r#"{"fromUserId":"1","conversationId":"c1","messageBody":"hi","senderType":"user"}"#;
        assert!(matches!(parse_frame(text), Frame::Malformed(_)));
    }

    #[test]
    fn mark_as_seen_parses_as_control() {
        let text = r#"{"type":"MARK_AS_SEEN","conversationId":"c1"}"#;
        match parse_frame(text) {
            Frame::Control(ControlFrame::MarkAsSeen { conversation_id }) => {
                assert_eq!(conversation_id, "c1");
            }
            other => panic!("expected control frame, got {:?}", other),
        }
    }

    #[test]
    fn mark_as_seen_without_conversation_is_malformed() {
        let text = r#"{"type":"MARK_AS_SEEN"}"#;
        assert!(matches!(parse_frame(text), Frame::Malformed(_)));
    }

    #[test]
    fn json_array_is_malformed() {
        assert!(matches!(parse_frame("[1,2]"), Frame::Malformed(_)));
    }

    #[test]
    fn server_events_use_type_payload_envelope() {
        let push = ServerEvent::NewMessage(MessageCreatedEvent {
            conversation_id: "c1".to_string(),
            sender_id: "1".to_string(),
            sender_type: Role::User,
            content: "hi".to_string(),
            created_at: Utc::now(),
        });
        let json = serde_json::to_value(&push).unwrap();
        assert_eq!(json["type"], "NEW_MESSAGE");
        assert_eq!(json["payload"]["conversationId"], "c1");

        let update = ServerEvent::UnseenCountUpdate(UnseenCountPayload {
            conversation_id: "c1".to_string(),
            count: 3,
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "UNSEEN_COUNT_UPDATE");
        assert_eq!(json["payload"]["count"], 3);
    }
}
