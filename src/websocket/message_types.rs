use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::MessageDelivery;

/// Events accepted from a client connection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInbound {
    Authenticate {
        token: String,
    },
    JoinConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        content_type: Option<String>,
        #[serde(default)]
        media_urls: Option<Vec<String>>,
    },
    TypingStart {
        conversation_id: Uuid,
    },
    TypingStop {
        conversation_id: Uuid,
    },
    MarkRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },
}

/// Events emitted to client connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutbound {
    Authenticated {
        user_id: Uuid,
    },
    AuthenticationError {
        reason: String,
    },
    JoinedConversation {
        conversation_id: Uuid,
    },
    NewMessage {
        conversation_id: Uuid,
        message: MessageDelivery,
    },
    MessageEdited {
        conversation_id: Uuid,
        message: MessageDelivery,
    },
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
    },
    MemberAdded {
        conversation_id: Uuid,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    ReadAck {
        conversation_id: Uuid,
        count: u64,
    },
    Error {
        category: String,
        reason: String,
    },
}

impl WsOutbound {
    pub fn to_message(&self) -> axum::extract::ws::Message {
        // Serialization of these enums cannot fail: no non-string map keys
        let text = serde_json::to_string(self).expect("outbound event serializes");
        axum::extract::ws::Message::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn inbound_events_deserialize_from_tagged_json() {
        let conversation = Uuid::new_v4();
        let raw = serde_json::json!({
            "type": "send_message",
            "conversation_id": conversation,
            "content": "hi",
        })
        .to_string();
        let evt: WsInbound = serde_json::from_str(&raw).unwrap();
        match evt {
            WsInbound::SendMessage {
                conversation_id,
                content,
                content_type,
                media_urls,
            } => {
                assert_eq!(conversation_id, conversation);
                assert_eq!(content, "hi");
                assert!(content_type.is_none());
                assert!(media_urls.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn outbound_events_carry_type_tag() {
        let conversation = Uuid::new_v4();
        let user = Uuid::new_v4();
        let evt = WsOutbound::UserTyping {
            conversation_id: conversation,
            user_id: user,
            is_typing: false,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&evt).unwrap()).unwrap();
        assert_eq!(value["type"], "user_typing");
        assert_eq!(value["is_typing"], false);
        assert_eq!(value["user_id"], user.to_string());
    }

    #[test]
    fn new_message_embeds_delivery_payload() {
        let delivery = MessageDelivery {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hello".into(),
            content_type: "text".into(),
            media_urls: None,
            created_at: Utc::now(),
            is_edited: false,
            is_deleted: false,
        };
        let evt = WsOutbound::NewMessage {
            conversation_id: delivery.conversation_id,
            message: delivery.clone(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&evt).unwrap()).unwrap();
        assert_eq!(value["type"], "new_message");
        assert_eq!(value["message"]["content"], "hello");
        // media_urls is omitted, never null, when absent
        assert!(value["message"].get("media_urls").is_none());
    }
}
