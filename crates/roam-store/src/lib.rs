//! Access to the hosted Conversation Store.
//!
//! [`ConversationStore`] and [`PushChannel`] are the seams to the backend;
//! [`StoreClient`] is the typed facade the session layer talks to.

pub mod client;
pub mod gateway;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use roam_types::{ChatResult, ConversationId, Message, UserId};

pub use client::StoreClient;
pub use gateway::GatewayPush;
pub use http::HttpStore;
pub use memory::MemoryStore;

/// Inserted messages for one conversation. Dropping the receiver releases
/// the channel on the backend side.
pub type PushStream = mpsc::UnboundedReceiver<Message>;

/// Raw operations offered by the backend.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Cheapest possible read. `Err` means unreachable.
    async fn probe(&self) -> ChatResult<()>;

    /// Must return the same id for {user, counterpart} in either order.
    async fn resolve_private_conversation(
        &self,
        user_id: &UserId,
        counterpart_id: &UserId,
    ) -> ChatResult<ConversationId>;

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>>;

    async fn insert_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> ChatResult<Message>;
}

/// Live insert feed filtered by conversation.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn open(&self, conversation_id: &ConversationId) -> ChatResult<PushStream>;
}
