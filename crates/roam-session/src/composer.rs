//! Message input with local send retry.

use tracing::{debug, warn};

use roam_types::ChatError;

use crate::controller::{SessionController, SessionNotice};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Draft was blank; nothing was sent.
    Empty,
    Sent { attempts: u32 },
    /// Delivery gave up. The draft is kept for the user to resend.
    Failed { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct Composer {
    draft: String,
    policy: RetryPolicy,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

impl Composer {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::MESSAGE_SEND)
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            draft: String::new(),
            policy,
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn can_submit(&self) -> bool {
        !self.draft.trim().is_empty()
    }

    /// Send the draft through `controller`, retrying with the composer's own
    /// policy. Errors that another attempt cannot fix (closed session, blank
    /// body, no conversation) stop the loop early.
    pub async fn submit(&mut self, controller: &SessionController) -> SubmitOutcome {
        if !self.can_submit() {
            return SubmitOutcome::Empty;
        }

        let max_attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            match controller.try_send(&self.draft).await {
                Ok(message) => {
                    debug!("Message {} delivered on attempt {}", message.id, attempt);
                    self.draft.clear();
                    return SubmitOutcome::Sent { attempts: attempt };
                }
                Err(e) => {
                    let retryable = matches!(e, ChatError::SendFailed(_));
                    if !retryable || attempt >= max_attempts {
                        warn!("Message not sent after {} attempt(s): {}", attempt, e);
                        controller.notify(SessionNotice::SendFailed {
                            attempts: attempt,
                            draft: self.draft.clone(),
                        });
                        return SubmitOutcome::Failed { attempts: attempt };
                    }

                    let delay = self.policy.delay_after(attempt);
                    debug!("Send attempt {} failed: {}; retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
