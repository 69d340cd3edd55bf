//! Direct-message session layer: conversation bootstrap with retry, send and
//! receive, one live push channel per open conversation, and write-through to
//! the local cache.

pub mod composer;
pub mod config;
pub mod controller;
pub mod retry;
pub mod subscriber;

pub use composer::{Composer, SubmitOutcome};
pub use config::ChatConfig;
pub use controller::{SessionController, SessionNotice, SessionState};
pub use retry::{RetryPolicy, with_retry, with_retry_observed};
pub use subscriber::{Subscriber, SubscriptionHandle};
