use std::sync::Arc;

use tracing::debug;

use roam_types::{ChatError, ChatResult, ConversationId, Message, UserId};

use crate::ConversationStore;

/// Typed facade over a [`ConversationStore`] acting as one local user.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn ConversationStore>,
    user_id: UserId,
}

impl StoreClient {
    pub fn new(store: Arc<dyn ConversationStore>, user_id: UserId) -> Self {
        Self { store, user_id }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Reachability check. Errors are swallowed into `false`.
    pub async fn probe(&self) -> bool {
        match self.store.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Store probe failed: {}", e);
                false
            }
        }
    }

    /// Find or create the private conversation with `counterpart_id`.
    pub async fn resolve_conversation(&self, counterpart_id: &UserId) -> ChatResult<ConversationId> {
        if counterpart_id.is_blank() {
            return Err(ChatError::InvalidArgument("counterpart id is empty".into()));
        }
        if *counterpart_id == self.user_id {
            return Err(ChatError::InvalidArgument(
                "a private conversation needs two distinct users".into(),
            ));
        }

        let conversation_id = self
            .store
            .resolve_private_conversation(&self.user_id, counterpart_id)
            .await?;
        debug!("Resolved conversation {} with {}", conversation_id, counterpart_id);
        Ok(conversation_id)
    }

    /// Full history, oldest first. An unknown or empty conversation yields `[]`.
    pub async fn fetch_history(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        let mut messages = self.store.fetch_messages(conversation_id).await?;
        // Stable: equal timestamps keep the store's order.
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }

    pub async fn append_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        body: &str,
    ) -> ChatResult<Message> {
        if body.trim().is_empty() {
            return Err(ChatError::InvalidArgument("message body is empty".into()));
        }
        self.store.insert_message(conversation_id, sender_id, body).await
    }
}
