#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use roam_session::{SessionController, SessionNotice, Subscriber};
use roam_store::{ConversationStore, MemoryStore, PushChannel, PushStream, StoreClient};
use roam_types::{ChatError, ChatResult, ConversationId, Message, UserId};

/// MemoryStore wrapper that fails the next N calls of an operation on demand.
#[derive(Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    pub fail_probes: AtomicU32,
    pub fail_resolves: AtomicU32,
    pub fail_history: AtomicU32,
    pub fail_inserts: AtomicU32,
    pub fail_subscribes: AtomicU32,
    pub probe_calls: AtomicU32,
    pub insert_calls: AtomicU32,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(counter: &AtomicU32, n: u32) {
        counter.store(n, Ordering::SeqCst);
    }

    fn should_fail(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn outage() -> ChatError {
    ChatError::StoreUnavailable("scripted outage".into())
}

#[async_trait]
impl ConversationStore for ScriptedStore {
    async fn probe(&self) -> ChatResult<()> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if Self::should_fail(&self.fail_probes) {
            return Err(outage());
        }
        self.inner.probe().await
    }

    async fn resolve_private_conversation(
        &self,
        user_id: &UserId,
        counterpart_id: &UserId,
    ) -> ChatResult<ConversationId> {
        if Self::should_fail(&self.fail_resolves) {
            return Err(outage());
        }
        self.inner
            .resolve_private_conversation(user_id, counterpart_id)
            .await
    }

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        if Self::should_fail(&self.fail_history) {
            return Err(outage());
        }
        self.inner.fetch_messages(conversation_id).await
    }

    async fn insert_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> ChatResult<Message> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if Self::should_fail(&self.fail_inserts) {
            return Err(outage());
        }
        self.inner
            .insert_message(conversation_id, sender_id, content)
            .await
    }
}

#[async_trait]
impl PushChannel for ScriptedStore {
    async fn open(&self, conversation_id: &ConversationId) -> ChatResult<PushStream> {
        if Self::should_fail(&self.fail_subscribes) {
            return Err(ChatError::SubscribeFailed("scripted outage".into()));
        }
        self.inner.open(conversation_id).await
    }
}

pub fn controller(store: &Arc<ScriptedStore>, user: &str) -> SessionController {
    let client = StoreClient::new(store.clone(), UserId::from(user));
    SessionController::new(client, Subscriber::new(store.clone()))
}

/// Everything published so far.
pub fn drain(rx: &mut broadcast::Receiver<SessionNotice>) -> Vec<SessionNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

/// Wait for the next pushed message, skipping other notices.
pub async fn next_received(rx: &mut broadcast::Receiver<SessionNotice>) -> Message {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(SessionNotice::MessageReceived(message)) => return message,
                Ok(_) => continue,
                Err(e) => panic!("notice channel failed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no message was pushed")
}

pub fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}
