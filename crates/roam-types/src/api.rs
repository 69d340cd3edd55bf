use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, UserId};

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConversationRequest {
    pub user_id: UserId,
    pub counterpart_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConversationResponse {
    pub conversation_id: ConversationId,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub content: String,
}
