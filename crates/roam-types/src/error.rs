use thiserror::Error;

/// Failures surfaced by the direct-message layer.
///
/// Decryption failures are deliberately absent: the codec absorbs them and
/// substitutes a placeholder body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Probe or resolve could not reach the conversation store.
    #[error("Conversation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Appending a message failed. The composed text is kept for a retry.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The push channel could not be opened. History and manual refresh still work.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("History fetch failed: {0}")]
    HistoryFailed(String),

    #[error("Local cache error: {0}")]
    Cache(String),

    #[error("Session is closed")]
    SessionClosed,
}

pub type ChatResult<T> = Result<T, ChatError>;
