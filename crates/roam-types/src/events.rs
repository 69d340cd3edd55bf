use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, Message};

/// Events delivered over the push gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// Gateway acknowledges a subscription
    Subscribed { conversation_ids: Vec<ConversationId> },

    /// A message row was inserted into a conversation
    MessageInsert { record: Message },
}

impl PushEvent {
    /// Returns the conversation an event is scoped to, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::MessageInsert { record } => Some(&record.conversation_id),
            Self::Subscribed { .. } => None,
        }
    }
}

/// Commands sent FROM client TO the push gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushCommand {
    /// Only insert events for these conversations are forwarded.
    Subscribe { conversation_ids: Vec<ConversationId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_event_is_tagged() {
        let json = r#"{"type":"MessageInsert","data":{"record":{
            "id":"m9","chat_id":"c2","sender_id":"bob","content":"ping",
            "sent_at":"2026-03-01T10:00:00Z","read_at":null}}}"#;

        let event: PushEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.conversation_id().map(|c| c.as_str()), Some("c2"));
    }

    #[test]
    fn subscribe_command_shape() {
        let cmd = PushCommand::Subscribe {
            conversation_ids: vec![ConversationId::from("c1")],
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "Subscribe");
        assert_eq!(value["data"]["conversation_ids"][0], "c1");
    }
}
