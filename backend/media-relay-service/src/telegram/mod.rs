//! Telegram transport: outbound delivery and long-polling intake.

use crate::error::DeliveryError;
use crate::frontend::{Frontend, Incoming};
use crate::services::delivery::DeliveryClient;
use async_trait::async_trait;
use media_core::{MediaArtifact, MediaFormat};
use std::future::Future;
use std::time::Duration;
use teloxide::{
    payloads::{SendAnimationSetters, SendVideoSetters},
    prelude::*,
    types::{AllowedUpdate, ChatId, InputFile, UpdateKind},
    ApiError, RequestError,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT_SECS: u32 = 30;
const MAX_RETRY_AFTER_WAITS: usize = 2;

/// Bot with an HTTP timeout longer than the long-polling timeout.
pub fn build_bot(token: &str) -> anyhow::Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(u64::from(POLL_TIMEOUT_SECS) + 15))
        .build()?;
    Ok(Bot::with_client(token, client))
}

pub struct TelegramDelivery {
    bot: Bot,
}

impl TelegramDelivery {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Conversation identities are Telegram chat ids.
pub fn parse_chat_id(conversation: &str) -> Result<ChatId, DeliveryError> {
    conversation
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| DeliveryError(format!("not a Telegram chat id: {conversation:?}")))
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

/// Run a request, honouring Telegram flood-control waits a bounded number of times.
async fn with_flood_control<T, F, Fut>(operation: &'static str, mut request: F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut waits = 0;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after_duration(&err) else {
                    return Err(err);
                };
                if waits >= MAX_RETRY_AFTER_WAITS {
                    return Err(err);
                }
                waits += 1;
                warn!(
                    operation,
                    retry_after_secs = wait.as_secs(),
                    "Telegram flood control, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[async_trait]
impl DeliveryClient for TelegramDelivery {
    async fn send_media(
        &self,
        conversation: &str,
        artifact: &MediaArtifact,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        let chat_id = parse_chat_id(conversation)?;

        let result = match artifact.format {
            MediaFormat::Video => {
                with_flood_control("send_video", || {
                    let mut request = self
                        .bot
                        .send_video(chat_id, InputFile::file(artifact.path.clone()))
                        .supports_streaming(true);
                    if let Some((width, height)) = artifact.dimensions {
                        request = request.width(width).height(height);
                    }
                    if let Some(caption) = caption {
                        request = request.caption(caption);
                    }
                    async move { request.await.map(|_| ()) }
                })
                .await
            }
            MediaFormat::AnimatedImage => {
                with_flood_control("send_animation", || {
                    let mut request = self
                        .bot
                        .send_animation(chat_id, InputFile::file(artifact.path.clone()));
                    if let Some((width, height)) = artifact.dimensions {
                        request = request.width(width).height(height);
                    }
                    if let Some(caption) = caption {
                        request = request.caption(caption);
                    }
                    async move { request.await.map(|_| ()) }
                })
                .await
            }
        };

        result.map_err(|e| DeliveryError(e.to_string()))
    }

    async fn send_text(&self, conversation: &str, text: &str) -> Result<(), DeliveryError> {
        let chat_id = parse_chat_id(conversation)?;
        with_flood_control("send_message", || {
            let request = self.bot.send_message(chat_id, text);
            async move { request.await.map(|_| ()) }
        })
        .await
        .map_err(|e| DeliveryError(e.to_string()))
    }
}

/// Long-poll Telegram for messages and answer them through the front-end
/// until shutdown is signalled.
pub async fn run_intake(
    bot: Bot,
    frontend: std::sync::Arc<Frontend>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    bot.delete_webhook().send().await?;
    info!("Telegram intake started");

    let mut offset: i32 = 0;
    while !*shutdown.borrow() {
        let poll = bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message]);

        let updates = tokio::select! {
            _ = shutdown.changed() => break,
            result = poll.send() => result,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = update.id.as_offset();
                    let UpdateKind::Message(msg) = update.kind else {
                        continue;
                    };
                    let Some(text) = msg.text() else {
                        continue;
                    };

                    let incoming = Incoming {
                        conversation_identity: msg.chat.id.0.to_string(),
                        requester_identity: msg
                            .from
                            .as_ref()
                            .map(|user| user.id.0.to_string())
                            .unwrap_or_else(|| msg.chat.id.0.to_string()),
                        text: text.to_string(),
                    };
                    debug!(chat_id = msg.chat.id.0, "Received message");

                    let reply = frontend.handle(&incoming).await;
                    if let Err(e) = bot.send_message(msg.chat.id, reply.text).await {
                        warn!(chat_id = msg.chat.id.0, error = %e, "Failed to send reply");
                    }
                }
            }
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                anyhow::bail!("another bot instance is polling with this token");
            }
            Err(e) => {
                error!(error = %e, "Telegram polling failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    info!("Telegram intake stopped");
    Ok(())
}
