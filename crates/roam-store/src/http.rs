use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use roam_types::api::{ResolveConversationRequest, ResolveConversationResponse, SendMessageRequest};
use roam_types::{ChatError, ChatResult, ConversationId, Message, UserId};

use crate::ConversationStore;

/// REST client for the hosted conversation store.
///
/// Routes:
/// - `GET  /health`
/// - `POST /conversations/private`
/// - `GET  /conversations/{id}/messages`
/// - `POST /conversations/{id}/messages`
pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStore {
    /// `timeout` bounds each individual request.
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> ChatResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::InvalidArgument(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn unavailable(e: reqwest::Error) -> ChatError {
    ChatError::StoreUnavailable(e.to_string())
}

/// Map non-success statuses: client errors are the caller's fault, the rest
/// means the store is not serving.
async fn check(resp: Response) -> ChatResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(ChatError::InvalidArgument(body));
    }

    warn!("Store responded {}: {}", status, body);
    Err(ChatError::StoreUnavailable(format!("store responded {}", status)))
}

#[async_trait]
impl ConversationStore for HttpStore {
    async fn probe(&self) -> ChatResult<()> {
        let resp = self
            .request(Method::GET, "/health")
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await?;
        Ok(())
    }

    async fn resolve_private_conversation(
        &self,
        user_id: &UserId,
        counterpart_id: &UserId,
    ) -> ChatResult<ConversationId> {
        let resp = self
            .request(Method::POST, "/conversations/private")
            .json(&ResolveConversationRequest {
                user_id: user_id.clone(),
                counterpart_id: counterpart_id.clone(),
            })
            .send()
            .await
            .map_err(unavailable)?;

        let body: ResolveConversationResponse = check(resp).await?.json().await.map_err(unavailable)?;
        Ok(body.conversation_id)
    }

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        let resp = self
            .request(Method::GET, &format!("/conversations/{}/messages", conversation_id))
            .send()
            .await
            .map_err(unavailable)?;

        let messages: Vec<Message> = check(resp).await?.json().await.map_err(unavailable)?;
        debug!("Fetched {} messages for {}", messages.len(), conversation_id);
        Ok(messages)
    }

    async fn insert_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> ChatResult<Message> {
        let resp = self
            .request(Method::POST, &format!("/conversations/{}/messages", conversation_id))
            .json(&SendMessageRequest {
                sender_id: sender_id.clone(),
                content: content.to_string(),
            })
            .send()
            .await
            .map_err(unavailable)?;

        check(resp).await?.json().await.map_err(unavailable)
    }
}
