use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use roam_store::PushChannel;
use roam_types::{ChatError, ChatResult, ConversationId, Message};

/// Opens push channels and forwards their inserts to a callback.
#[derive(Clone)]
pub struct Subscriber {
    channel: Arc<dyn PushChannel>,
}

impl Subscriber {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self { channel }
    }

    /// Open a channel scoped to `conversation_id`. Every insert for that
    /// conversation is passed to `on_message` from a background task until
    /// the handle is released.
    pub async fn subscribe<F>(
        &self,
        conversation_id: &ConversationId,
        on_message: F,
    ) -> ChatResult<SubscriptionHandle>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let mut stream = self
            .channel
            .open(conversation_id)
            .await
            .map_err(|e| match e {
                ChatError::SubscribeFailed(_) => e,
                other => ChatError::SubscribeFailed(other.to_string()),
            })?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let scope = conversation_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    next = stream.recv() => match next {
                        Some(message) if message.conversation_id == scope => on_message(message),
                        Some(message) => trace!("Ignoring insert for {}", message.conversation_id),
                        None => {
                            warn!("Push channel for {} ended", scope);
                            break;
                        }
                    },
                }
            }
        });

        info!("Subscribed to conversation {}", conversation_id);
        Ok(SubscriptionHandle {
            conversation_id: conversation_id.clone(),
            token,
            task: Some(task),
        })
    }

    /// Release `handle`. Safe to call any number of times.
    pub async fn unsubscribe(&self, handle: &mut SubscriptionHandle) {
        handle.release().await;
    }
}

/// A live push channel. Dropping it stops delivery; [`release`](Self::release)
/// additionally waits until the channel is torn down.
pub struct SubscriptionHandle {
    conversation_id: ConversationId,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn release(&mut self) {
        self.token.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!("Push task for {} ended abnormally: {}", self.conversation_id, e);
            }
        }
        debug!("Unsubscribed from conversation {}", self.conversation_id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
