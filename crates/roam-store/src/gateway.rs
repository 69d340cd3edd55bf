use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tracing::{debug, info, trace, warn};

use roam_types::events::{PushCommand, PushEvent};
use roam_types::{ChatError, ChatResult, ConversationId};

use crate::{PushChannel, PushStream};

/// WebSocket push gateway. One socket per opened conversation.
pub struct GatewayPush {
    url: String,
    token: Option<String>,
}

impl GatewayPush {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }
}

fn subscribe_failed(e: impl std::fmt::Display) -> ChatError {
    ChatError::SubscribeFailed(e.to_string())
}

#[async_trait]
impl PushChannel for GatewayPush {
    async fn open(&self, conversation_id: &ConversationId) -> ChatResult<PushStream> {
        let mut request = self.url.as_str().into_client_request().map_err(subscribe_failed)?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(subscribe_failed)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _) = connect_async(request).await.map_err(subscribe_failed)?;
        let (mut sink, mut frames) = socket.split();

        let subscribe = PushCommand::Subscribe {
            conversation_ids: vec![conversation_id.clone()],
        };
        let text = serde_json::to_string(&subscribe).map_err(subscribe_failed)?;
        sink.send(Frame::Text(text.into())).await.map_err(subscribe_failed)?;

        info!("Push gateway connected for conversation {}", conversation_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let conversation_id = conversation_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Receiver dropped: the subscriber let go of this channel.
                    _ = tx.closed() => {
                        let _ = sink.send(Frame::Close(None)).await;
                        break;
                    }
                    frame = frames.next() => {
                        match frame {
                            Some(Ok(Frame::Text(text))) => {
                                match serde_json::from_str::<PushEvent>(text.as_str()) {
                                    Ok(PushEvent::MessageInsert { record }) => {
                                        if record.conversation_id != conversation_id {
                                            trace!("Ignoring insert for {}", record.conversation_id);
                                            continue;
                                        }
                                        if tx.send(record).is_err() {
                                            break;
                                        }
                                    }
                                    Ok(PushEvent::Subscribed { .. }) => {
                                        debug!("Gateway acknowledged subscription to {}", conversation_id);
                                    }
                                    Err(e) => warn!("Unparseable gateway event: {}", e),
                                }
                            }
                            Some(Ok(Frame::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Push gateway error on {}: {}", conversation_id, e);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Push channel for {} closed", conversation_id);
        });

        Ok(rx)
    }
}
