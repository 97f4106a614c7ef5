//! Chat socket client
//!
//! Keeps one websocket to the chat platform open, reconnecting with uniformly
//! jittered delays, and hands every user message to a bounded pool of
//! pipeline workers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dtalks_conversation::ChatHandler;
use dtalks_core::{InboundMessage, MessageSink, SocketEvent, TransportConfig};
use dtalks_infra::{RetryConfig, RetryPolicy};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROTOCOL_VERSION: &str = "2.0.0";
const MESSAGE_EVENT: &str = "message";

/// Socket URL carrying the bot token and protocol version
pub fn socket_url(base: &str, bot_token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}bot_token={}&vsn={}",
        base, separator, bot_token, PROTOCOL_VERSION
    )
}

/// User message carried by a socket frame, if it is one we should answer
pub fn parse_frame(frame: &str) -> Option<InboundMessage> {
    let event: SocketEvent = match serde_json::from_str(frame) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON frame");
            return None;
        }
    };
    if event.event != MESSAGE_EVENT {
        return None;
    }
    let message: InboundMessage = match serde_json::from_value(event.data) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Malformed message event");
            return None;
        }
    };
    if message.user.is_bot {
        return None;
    }
    Some(message)
}

/// Work done for one user message
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_message(&self, user_id: &str, text: &str, sink: &dyn MessageSink) -> Result<()>;
}

#[async_trait]
impl InboundHandler for ChatHandler {
    async fn on_message(&self, user_id: &str, text: &str, sink: &dyn MessageSink) -> Result<()> {
        Ok(self.handle(user_id, text, sink).await?)
    }
}

/// Runs each inbound message on its own task, at most `limit` at a time.
///
/// Dispatching never waits: tasks queue on the semaphore, not the socket loop.
pub struct Dispatcher {
    handler: Arc<dyn InboundHandler>,
    sink: Arc<dyn MessageSink>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn InboundHandler>, sink: Arc<dyn MessageSink>, limit: usize) -> Self {
        Self {
            handler,
            sink,
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Hand the message to a task that runs once a worker frees up
    pub fn dispatch(&self, message: InboundMessage) {
        let user_id = message.user_key();
        let text = message.text().unwrap_or_default().to_string();
        info!(user_id = %user_id, user = message.display_name(), "Inbound message");

        let permits = Arc::clone(&self.permits);
        let handler = Arc::clone(&self.handler);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(user_id = %user_id, "Worker pool closed, dropping message");
                return;
            };
            if let Err(e) = handler.on_message(&user_id, &text, sink.as_ref()).await {
                error!(user_id = %user_id, error = %e, "Message handling failed");
            }
        });
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

pub struct TransportClient {
    config: TransportConfig,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
}

impl TransportClient {
    pub fn new(config: TransportConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let retry = RetryPolicy::new(RetryConfig::from_secs_range(
            config.max_retries,
            config.retry_min_delay_secs,
            config.retry_max_delay_secs,
        ));
        Self {
            config,
            dispatcher,
            retry,
        }
    }

    /// Stay connected until shutdown. Failing `max_retries` connects in a
    /// row is returned as an error.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let limit = self.config.max_retries.max(1);
        let mut failures: u32 = 0;

        loop {
            match self.session(&shutdown, &mut failures).await {
                Ok(()) if shutdown.is_cancelled() => {
                    info!("Socket closed for shutdown");
                    return Ok(());
                }
                Ok(()) => warn!("Socket closed by server"),
                Err(e) => warn!(error = %e, "Socket session failed"),
            }

            failures += 1;
            if failures >= limit {
                bail!("giving up on chat socket after {} attempts", failures);
            }
            let delay = self.retry.delay_for_attempt(failures);
            info!(
                attempt = failures + 1,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to chat socket"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }

    async fn session(&self, shutdown: &CancellationToken, failures: &mut u32) -> Result<()> {
        let url = socket_url(&self.config.ws_url, &self.config.bot_token);
        let mut request = url
            .as_str()
            .into_client_request()
            .context("invalid socket url")?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.bot_token))
            .context("invalid bot token")?;
        request.headers_mut().insert("Authorization", bearer);

        let (stream, _) = connect_async(request)
            .await
            .context("socket connect failed")?;
        info!("Connected to chat socket");
        *failures = 0;

        let (mut tx, mut rx) = stream.split();
        let mut ping = tokio::time::interval(self.config.ping_interval());
        ping.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = tx.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    tx.send(WsMessage::Ping(Vec::new()))
                        .await
                        .context("ping failed")?;
                    debug!("Ping sent");
                }
                frame = rx.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(message) = parse_frame(&text) {
                            self.dispatcher.dispatch(message);
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        tx.send(WsMessage::Pong(data)).await.context("pong failed")?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("socket read failed"),
                },
            }
        }
    }
}
