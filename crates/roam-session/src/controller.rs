//! Session Controller: owns one open two-party conversation view.
//!
//! ```text
//! Idle -> Initializing -> Ready <-> Sending
//!              |
//!              +-> Failed --retry()--> Initializing
//! any -> Closed
//! ```
//!
//! Initialization runs probe -> resolve -> history -> subscribe strictly in
//! that order. Only probe and resolve are retried; failing either after the
//! bootstrap policy is exhausted lands in `Failed`. History and subscription
//! failures degrade the view but never fail it.
//!
//! Bodies leave the client encrypted with the sender's key and are opened
//! with the sender's key again on arrival, from history, push and send alike.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::{debug, info, trace, warn};

use roam_cache::{LocalCache, PurgeReport};
use roam_crypto::{encrypt, open_cached};
use roam_store::StoreClient;
use roam_types::models::StoragePreference;
use roam_types::{ChatError, ChatResult, ConversationId, Message, UserId};

use crate::retry::{RetryPolicy, with_retry_observed};
use crate::subscriber::{Subscriber, SubscriptionHandle};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Ready,
    Sending,
    Failed,
    Closed,
}

/// Out-of-band signals for the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Bootstrap gave up. The view shows a retry control.
    InitializationFailed { reason: String },
    HistoryFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    /// Live updates are off for this conversation; manual refresh still works.
    SubscribeFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    MessageReceived(Message),
    /// The composer exhausted its attempts. The draft is still in the input.
    SendFailed { attempts: u32, draft: String },
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    counterpart_id: Option<UserId>,
    conversation_id: Option<ConversationId>,
    /// Ordered by sent_at, unique by id
    messages: Vec<Message>,
    loading: bool,
    connection_error: bool,
    /// Failed bootstrap attempts since the last open/retry
    attempts: u32,
    /// Bumped on every open/retry so late results of an older run are dropped
    epoch: u64,
    sends_in_flight: u32,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            counterpart_id: None,
            conversation_id: None,
            messages: Vec::new(),
            loading: false,
            connection_error: false,
            attempts: 0,
            epoch: 0,
            sends_in_flight: 0,
        }
    }

    /// Enter `Initializing` for `counterpart_id` and return the new epoch.
    fn begin(&mut self, counterpart_id: UserId) -> u64 {
        self.epoch += 1;
        self.state = SessionState::Initializing;
        self.counterpart_id = Some(counterpart_id);
        self.conversation_id = None;
        self.messages.clear();
        self.loading = true;
        self.connection_error = false;
        self.attempts = 0;
        self.sends_in_flight = 0;
        self.epoch
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.state != SessionState::Closed
    }

    /// Insert keeping sent_at order. Returns false if the id is already present.
    fn insert(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(at, message);
        true
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store records carry the body encrypted with the sender's key. Plaintext
/// system messages pass through unchanged.
fn reveal(mut message: Message) -> Message {
    message.body = open_cached(&message.body, &message.sender_id);
    message
}

fn write_through(cache: Option<&LocalCache>, owner: &UserId, message: &Message) {
    if let Some(cache) = cache {
        if let Err(e) = cache.store_synced(owner, message) {
            warn!("Could not cache message {}: {}", message.id, e);
        }
    }
}

/// Push-channel callback. Runs on the subscriber task.
fn deliver_push(
    session: &Mutex<Session>,
    owner: &UserId,
    cache: Option<&LocalCache>,
    notices: &broadcast::Sender<SessionNotice>,
    epoch: u64,
    message: Message,
) {
    // Own sends were already appended when append_message returned.
    if message.is_from(owner) {
        trace!("Dropping echo of own message {}", message.id);
        return;
    }

    let message = reveal(message);
    {
        let mut s = lock(session);
        if !s.is_current(epoch) || s.conversation_id.as_ref() != Some(&message.conversation_id) {
            return;
        }
        if !s.insert(message.clone()) {
            return;
        }
    }

    debug!("Received message {} in {}", message.id, message.conversation_id);
    write_through(cache, owner, &message);
    let _ = notices.send(SessionNotice::MessageReceived(message));
}

fn send_failed(e: ChatError) -> ChatError {
    match e {
        ChatError::InvalidArgument(_) | ChatError::SendFailed(_) => e,
        other => ChatError::SendFailed(other.to_string()),
    }
}

pub struct SessionController {
    store: StoreClient,
    subscriber: Subscriber,
    bootstrap: RetryPolicy,
    cache: Option<Arc<LocalCache>>,
    session: Arc<Mutex<Session>>,
    /// The single live push channel of this session
    channel: AsyncMutex<Option<SubscriptionHandle>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionController {
    pub fn new(store: StoreClient, subscriber: Subscriber) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            store,
            subscriber,
            bootstrap: RetryPolicy::BOOTSTRAP,
            cache: None,
            session: Arc::new(Mutex::new(Session::new())),
            channel: AsyncMutex::new(None),
            notices,
        }
    }

    pub fn with_bootstrap_policy(mut self, policy: RetryPolicy) -> Self {
        self.bootstrap = policy;
        self
    }

    /// Write every store-confirmed message through to `cache`.
    pub fn with_cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn user_id(&self) -> &UserId {
        self.store.user_id()
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    pub(crate) fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    // -- Lifecycle --

    /// Open the conversation with `counterpart_id`, replacing any open one.
    pub async fn open(&self, counterpart_id: impl Into<UserId>) -> ChatResult<()> {
        let counterpart_id = counterpart_id.into();
        if counterpart_id.is_blank() {
            return Err(ChatError::InvalidArgument("counterpart id is empty".into()));
        }
        if counterpart_id == *self.user_id() {
            return Err(ChatError::InvalidArgument(
                "cannot open a conversation with yourself".into(),
            ));
        }

        let epoch = {
            let mut s = self.lock();
            if s.state == SessionState::Closed {
                return Err(ChatError::SessionClosed);
            }
            s.begin(counterpart_id.clone())
        };

        // At most one live channel per session: let go of the previous one first.
        self.release_channel().await;

        info!("Opening conversation with {}", counterpart_id);
        self.initialize(epoch, &counterpart_id).await
    }

    /// Re-run initialization after `Failed`.
    pub async fn retry(&self) -> ChatResult<()> {
        let (epoch, counterpart_id) = {
            let mut s = self.lock();
            match s.state {
                SessionState::Failed => {}
                SessionState::Closed => return Err(ChatError::SessionClosed),
                other => {
                    return Err(ChatError::InvalidArgument(format!(
                        "retry is only available after a failed open (session is {:?})",
                        other
                    )));
                }
            }
            let counterpart_id = s
                .counterpart_id
                .clone()
                .ok_or_else(|| ChatError::InvalidArgument("no counterpart selected".into()))?;
            (s.begin(counterpart_id.clone()), counterpart_id)
        };

        info!("Retrying conversation with {}", counterpart_id);
        self.initialize(epoch, &counterpart_id).await
    }

    /// Tear down: release the channel and turn every later call into a no-op.
    pub async fn close(&self) {
        {
            let mut s = self.lock();
            if s.state == SessionState::Closed {
                return;
            }
            s.state = SessionState::Closed;
            s.loading = false;
            s.sends_in_flight = 0;
        }
        self.release_channel().await;
        info!("Session closed");
    }

    async fn initialize(&self, epoch: u64, counterpart_id: &UserId) -> ChatResult<()> {
        let this = self;

        let probe = with_retry_observed(
            self.bootstrap,
            "store probe",
            move || async move {
                if this.store.probe().await {
                    Ok(())
                } else {
                    Err(ChatError::StoreUnavailable("store probe failed".into()))
                }
            },
            |_, _| this.count_failure(epoch),
        )
        .await;
        if let Err(e) = probe {
            return self.fail(epoch, e);
        }

        let resolved = with_retry_observed(
            self.bootstrap,
            "resolve conversation",
            move || async move { this.store.resolve_conversation(counterpart_id).await },
            |_, _| this.count_failure(epoch),
        )
        .await;
        let conversation_id = match resolved {
            Ok(id) => id,
            Err(e) => return self.fail(epoch, e),
        };

        let current = {
            let mut s = self.lock();
            let current = s.is_current(epoch);
            if current {
                s.conversation_id = Some(conversation_id.clone());
            }
            current
        };
        if !current {
            return self.superseded();
        }

        self.load_history(epoch, &conversation_id).await;
        self.open_channel(epoch, &conversation_id).await;

        let mut s = self.lock();
        if !s.is_current(epoch) {
            drop(s);
            return self.superseded();
        }
        s.state = SessionState::Ready;
        s.loading = false;
        info!(
            "Conversation {} ready with {} messages",
            conversation_id,
            s.messages.len()
        );
        Ok(())
    }

    fn count_failure(&self, epoch: u64) {
        let mut s = self.lock();
        if s.epoch == epoch {
            s.attempts += 1;
        }
    }

    fn fail(&self, epoch: u64, error: ChatError) -> ChatResult<()> {
        {
            let mut s = self.lock();
            if !s.is_current(epoch) {
                drop(s);
                return self.superseded();
            }
            s.state = SessionState::Failed;
            s.loading = false;
            s.connection_error = true;
        }

        warn!("Conversation bootstrap failed: {}", error);
        self.notify(SessionNotice::InitializationFailed {
            reason: error.to_string(),
        });
        Err(error)
    }

    /// Result for a run that was overtaken by `close()` or a newer `open()`.
    fn superseded(&self) -> ChatResult<()> {
        debug!("Discarding result of a superseded initialization");
        if self.lock().state == SessionState::Closed {
            Err(ChatError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn load_history(&self, epoch: u64, conversation_id: &ConversationId) {
        match self.store.fetch_history(conversation_id).await {
            Ok(history) => {
                let history: Vec<Message> = history.into_iter().map(reveal).collect();
                {
                    let mut s = self.lock();
                    if !s.is_current(epoch) {
                        return;
                    }
                    for message in history.iter().cloned() {
                        s.insert(message);
                    }
                }
                for message in &history {
                    write_through(self.cache.as_deref(), self.user_id(), message);
                }
            }
            Err(e) => {
                warn!("History for {} unavailable: {}", conversation_id, e);
                let cached = self.cached_bucket(conversation_id);
                {
                    let mut s = self.lock();
                    if !s.is_current(epoch) {
                        return;
                    }
                    for message in cached {
                        s.insert(message);
                    }
                }
                self.notify(SessionNotice::HistoryFailed {
                    conversation_id: conversation_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn cached_bucket(&self, conversation_id: &ConversationId) -> Vec<Message> {
        let Some(cache) = &self.cache else {
            return Vec::new();
        };
        match cache.load_bucket(self.user_id(), conversation_id) {
            Ok(messages) => {
                debug!("Showing {} cached messages for {}", messages.len(), conversation_id);
                messages
            }
            Err(e) => {
                warn!("Could not read cached messages for {}: {}", conversation_id, e);
                Vec::new()
            }
        }
    }

    async fn open_channel(&self, epoch: u64, conversation_id: &ConversationId) {
        let session = Arc::clone(&self.session);
        let owner = self.user_id().clone();
        let cache = self.cache.clone();
        let notices = self.notices.clone();
        let on_message = move |message: Message| {
            deliver_push(&session, &owner, cache.as_deref(), &notices, epoch, message)
        };

        match self.subscriber.subscribe(conversation_id, on_message).await {
            Ok(mut handle) => {
                let mut channel = self.channel.lock().await;
                let current = self.lock().is_current(epoch);
                if !current {
                    drop(channel);
                    handle.release().await;
                    return;
                }
                if let Some(mut previous) = channel.replace(handle) {
                    previous.release().await;
                }
            }
            Err(e) => {
                warn!("Live updates for {} unavailable: {}", conversation_id, e);
                self.notify(SessionNotice::SubscribeFailed {
                    conversation_id: conversation_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn release_channel(&self) {
        let mut channel = self.channel.lock().await;
        if let Some(mut handle) = channel.take() {
            handle.release().await;
        }
    }

    // -- Messaging --

    /// Send `body`. Returns false, without touching the list, when the body is
    /// blank, the session cannot send, or the store rejected the message.
    pub async fn send(&self, body: &str) -> bool {
        self.try_send(body).await.is_ok()
    }

    /// Like [`send`](Self::send) but reports why nothing was sent.
    pub async fn try_send(&self, body: &str) -> ChatResult<Message> {
        if body.trim().is_empty() {
            return Err(ChatError::InvalidArgument("message body is empty".into()));
        }
        let sealed = encrypt(body, self.user_id())
            .map_err(|e| ChatError::SendFailed(format!("encrypting message: {}", e)))?;

        let (epoch, conversation_id) = {
            let mut s = self.lock();
            match s.state {
                SessionState::Ready | SessionState::Sending => {}
                SessionState::Closed => return Err(ChatError::SessionClosed),
                other => {
                    return Err(ChatError::InvalidArgument(format!(
                        "cannot send while {:?}",
                        other
                    )));
                }
            }
            let Some(conversation_id) = s.conversation_id.clone() else {
                return Err(ChatError::InvalidArgument("no conversation resolved".into()));
            };
            s.sends_in_flight += 1;
            s.state = SessionState::Sending;
            (s.epoch, conversation_id)
        };

        let result = self
            .store
            .append_message(&conversation_id, self.user_id(), &sealed)
            .await
            .map(reveal);

        {
            let mut s = self.lock();
            if !s.is_current(epoch) {
                debug!("Discarding send result for a session that moved on");
                if s.state == SessionState::Closed {
                    return Err(ChatError::SessionClosed);
                }
                return result.map_err(send_failed);
            }
            s.sends_in_flight = s.sends_in_flight.saturating_sub(1);
            if s.sends_in_flight == 0 {
                s.state = SessionState::Ready;
            }
            if let Ok(message) = &result {
                s.insert(message.clone());
            }
        }

        match result {
            Ok(message) => {
                debug!("Sent message {} to {}", message.id, conversation_id);
                write_through(self.cache.as_deref(), self.user_id(), &message);
                Ok(message)
            }
            Err(e) => {
                warn!("Send to {} failed: {}", conversation_id, e);
                Err(send_failed(e))
            }
        }
    }

    /// Re-fetch history and merge anything not yet in the list.
    /// The manual substitute for a degraded push channel.
    pub async fn refresh(&self) -> ChatResult<usize> {
        let (epoch, conversation_id) = {
            let s = self.lock();
            match s.state {
                SessionState::Ready | SessionState::Sending => {}
                SessionState::Closed => return Err(ChatError::SessionClosed),
                other => {
                    return Err(ChatError::InvalidArgument(format!(
                        "cannot refresh while {:?}",
                        other
                    )));
                }
            }
            let conversation_id = s
                .conversation_id
                .clone()
                .ok_or_else(|| ChatError::InvalidArgument("no conversation resolved".into()))?;
            (s.epoch, conversation_id)
        };

        let history = self
            .store
            .fetch_history(&conversation_id)
            .await
            .map_err(|e| ChatError::HistoryFailed(e.to_string()))?;

        let added: Vec<Message> = {
            let mut s = self.lock();
            if !s.is_current(epoch) {
                return Ok(0);
            }
            history.into_iter().map(reveal).filter(|m| s.insert(m.clone())).collect()
        };

        for message in &added {
            write_through(self.cache.as_deref(), self.user_id(), message);
        }
        if !added.is_empty() {
            debug!("Refresh merged {} messages into {}", added.len(), conversation_id);
        }
        Ok(added.len())
    }

    // -- Local cache --

    fn cache(&self) -> ChatResult<&LocalCache> {
        self.cache
            .as_deref()
            .ok_or_else(|| ChatError::Cache("no local cache configured".into()))
    }

    pub fn storage_preferences(&self) -> ChatResult<StoragePreference> {
        self.cache()?
            .preferences(self.user_id())
            .map_err(|e| ChatError::Cache(e.to_string()))
    }

    pub fn set_storage_preferences(&self, pref: &StoragePreference) -> ChatResult<()> {
        self.cache()?
            .set_preferences(self.user_id(), pref)
            .map_err(|e| ChatError::Cache(e.to_string()))?;
        info!("Storage preferences updated for {}", self.user_id());
        Ok(())
    }

    /// Drop this user's cached messages that are past their retention window.
    /// Only the local cache is touched, never the store.
    pub fn purge_local_cache(&self) -> ChatResult<PurgeReport> {
        self.cache()?
            .purge_expired(self.user_id())
            .map_err(|e| ChatError::Cache(e.to_string()))
    }

    // -- View state --

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.lock().conversation_id.clone()
    }

    pub fn counterpart_id(&self) -> Option<UserId> {
        self.lock().counterpart_id.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn has_connection_error(&self) -> bool {
        self.lock().connection_error
    }

    /// Failed bootstrap attempts of the current run.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    pub async fn has_live_channel(&self) -> bool {
        self.channel
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.is_live())
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }
}
