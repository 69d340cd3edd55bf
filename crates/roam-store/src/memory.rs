use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use roam_types::models::{Conversation, ConversationKind, ParticipantLink};
use roam_types::{ChatError, ChatResult, ConversationId, Message, MessageId, UserId};

use crate::{ConversationStore, PushChannel, PushStream};

/// In-process conversation store with push fan-out.
///
/// Used by tests and the offline demo. Clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// When false every operation fails with `StoreUnavailable`
    online: AtomicBool,

    /// Unordered identity pair -> conversation
    conversations: RwLock<HashMap<(UserId, UserId), Conversation>>,

    participants: RwLock<HashMap<ConversationId, Vec<ParticipantLink>>>,

    /// conversation_id -> messages in insertion (= sent_at) order
    messages: RwLock<HashMap<ConversationId, Vec<Message>>>,

    /// Live push channels: conversation_id -> senders
    subscribers: RwLock<HashMap<ConversationId, Vec<mpsc::UnboundedSender<Message>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStoreInner {
                online: AtomicBool::new(true),
                conversations: RwLock::new(HashMap::new()),
                participants: RwLock::new(HashMap::new()),
                messages: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub async fn conversation(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        self.inner
            .conversations
            .read()
            .await
            .values()
            .find(|c| c.id == *conversation_id)
            .cloned()
    }

    pub async fn participants(&self, conversation_id: &ConversationId) -> Vec<ParticipantLink> {
        self.inner
            .participants
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of push channels for `conversation_id` whose receiver is still alive.
    pub async fn live_channels(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .get(conversation_id)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn ensure_online(&self) -> ChatResult<()> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChatError::StoreUnavailable("store is offline".into()))
        }
    }

    /// Deliver an insert to every live channel of its conversation, pruning dead ones.
    async fn fan_out(&self, message: &Message) {
        let mut subscribers = self.inner.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(&message.conversation_id) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn pair_key(a: &UserId, b: &UserId) -> (UserId, UserId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn probe(&self) -> ChatResult<()> {
        self.ensure_online()
    }

    async fn resolve_private_conversation(
        &self,
        user_id: &UserId,
        counterpart_id: &UserId,
    ) -> ChatResult<ConversationId> {
        self.ensure_online()?;

        let key = pair_key(user_id, counterpart_id);
        let mut conversations = self.inner.conversations.write().await;
        if let Some(existing) = conversations.get(&key) {
            return Ok(existing.id.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::from(Uuid::new_v4().to_string()),
            kind: ConversationKind::Private,
            created_at: now,
        };
        let links = [user_id, counterpart_id]
            .into_iter()
            .map(|uid| ParticipantLink {
                conversation_id: conversation.id.clone(),
                user_id: uid.clone(),
                joined_at: now,
            })
            .collect();

        self.inner
            .participants
            .write()
            .await
            .insert(conversation.id.clone(), links);
        let id = conversation.id.clone();
        conversations.insert(key, conversation);

        debug!("Created private conversation {} for {} and {}", id, user_id, counterpart_id);
        Ok(id)
    }

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        self.ensure_online()?;
        Ok(self
            .inner
            .messages
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> ChatResult<Message> {
        self.ensure_online()?;

        let message = {
            let mut messages = self.inner.messages.write().await;
            let thread = messages.entry(conversation_id.clone()).or_default();

            // Keep sent_at non-decreasing even if the wall clock steps back.
            let mut sent_at = Utc::now();
            if let Some(last) = thread.last() {
                sent_at = sent_at.max(last.sent_at);
            }

            let message = Message {
                id: MessageId::from(Uuid::new_v4().to_string()),
                conversation_id: conversation_id.clone(),
                sender_id: sender_id.clone(),
                body: content.to_string(),
                sent_at,
                read_at: None,
            };
            thread.push(message.clone());
            message
        };

        self.fan_out(&message).await;
        Ok(message)
    }
}

#[async_trait]
impl PushChannel for MemoryStore {
    async fn open(&self, conversation_id: &ConversationId) -> ChatResult<PushStream> {
        if let Err(e) = self.ensure_online() {
            return Err(ChatError::SubscribeFailed(e.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.inner.subscribers.write().await;
        let senders = subscribers.entry(conversation_id.clone()).or_default();
        // Channels dropped without any insert in between would otherwise pile up.
        senders.retain(|tx| !tx.is_closed());
        senders.push(tx);
        Ok(rx)
    }
}
