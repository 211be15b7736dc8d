//! Telegram Bot API source channel
//!
//! The bot must be a member (or admin) of every watched channel. Updates are
//! pulled with long polling by a background task that lives as long as the
//! session; a failed poll marks the session down and lets the connection
//! supervisor take over.

mod convert;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dropwatch_domain::{
    MediaAttachment, MediaDownloader, MessageHandler, SourceChannel, SourceError,
};
use secrecy::{ExposeSecret, SecretString};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, FileId};
use teloxide::{ApiError, RequestError};
use tokio::task::JoinHandle;

type HandlerSlot = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

/// Telegram source settings
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Long-poll timeout passed to `getUpdates`
    pub poll_timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(10),
        }
    }
}

/// Source channel backed by a bot account
pub struct TelegramSource {
    bot: Bot,
    config: TelegramConfig,
    connected: Arc<AtomicBool>,
    offset: Arc<AtomicI32>,
    handler: HandlerSlot,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramSource {
    pub fn new(token: &SecretString, config: TelegramConfig) -> Self {
        Self::from_bot(Bot::new(token.expose_secret()), config)
    }

    pub fn from_bot(bot: Bot, config: TelegramConfig) -> Self {
        Self {
            bot,
            config,
            connected: Arc::new(AtomicBool::new(false)),
            offset: Arc::new(AtomicI32::new(0)),
            handler: Arc::new(RwLock::new(None)),
            poller: Mutex::new(None),
        }
    }

    fn stop_poller(&self) {
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = previous {
            task.abort();
        }
    }

    fn start_poller(&self) {
        let poller = Poller {
            bot: self.bot.clone(),
            timeout_secs: u32::try_from(self.config.poll_timeout.as_secs()).unwrap_or(u32::MAX),
            connected: self.connected.clone(),
            offset: self.offset.clone(),
            handler: self.handler.clone(),
        };
        let task = tokio::spawn(poller.run());

        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(task) = previous {
            task.abort();
        }
    }
}

fn map_request_error(error: RequestError) -> SourceError {
    match error {
        RequestError::Api(ApiError::InvalidToken) => {
            SourceError::Auth("Bot token rejected".to_string())
        }
        RequestError::Network(e) => SourceError::Network(e.to_string()),
        RequestError::Io(e) => SourceError::Network(e.to_string()),
        other => SourceError::Connect(other.to_string()),
    }
}

#[async_trait]
impl SourceChannel for TelegramSource {
    async fn connect(&self) -> Result<(), SourceError> {
        let me = self.bot.get_me().await.map_err(map_request_error)?;
        tracing::info!(
            bot = me.user.username.as_deref().unwrap_or("unknown"),
            "Telegram session established"
        );

        self.connected.store(true, Ordering::SeqCst);
        self.start_poller();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_poller();
        tracing::info!("Telegram session closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), SourceError> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }
        self.bot.get_me().await.map_err(map_request_error)?;
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn unsubscribe(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn platform(&self) -> &'static str {
        "telegram"
    }
}

#[async_trait]
impl MediaDownloader for TelegramSource {
    async fn download(
        &self,
        media: &MediaAttachment,
        destination: &Path,
    ) -> Result<(), SourceError> {
        let file = self
            .bot
            .get_file(FileId(media.source.clone()))
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;

        let mut dst = tokio::fs::File::create(destination)
            .await
            .map_err(|e| SourceError::Download(format!("Failed to create file: {}", e)))?;

        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;

        tracing::debug!(
            kind = media.kind.as_str(),
            bytes = file.meta.size,
            path = %destination.display(),
            "Downloaded media"
        );
        Ok(())
    }
}

/// Long-polling loop owned by one session
struct Poller {
    bot: Bot,
    timeout_secs: u32,
    connected: Arc<AtomicBool>,
    offset: Arc<AtomicI32>,
    handler: HandlerSlot,
}

impl Poller {
    async fn run(self) {
        while self.connected.load(Ordering::SeqCst) {
            let result = self
                .bot
                .get_updates()
                .offset(self.offset.load(Ordering::SeqCst))
                .timeout(self.timeout_secs)
                .allowed_updates(vec![
                    AllowedUpdate::ChannelPost,
                    AllowedUpdate::EditedChannelPost,
                    AllowedUpdate::Message,
                    AllowedUpdate::EditedMessage,
                ])
                .await;

            let updates = match result {
                Ok(updates) => updates,
                Err(RequestError::RetryAfter(wait)) => {
                    tracing::warn!(wait_secs = wait.seconds(), "Polling throttled");
                    tokio::time::sleep(wait.duration()).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Polling failed, marking session down");
                    self.connected.store(false, Ordering::SeqCst);
                    return;
                }
            };

            for update in updates {
                self.offset.store(update.id.as_offset(), Ordering::SeqCst);
                let Some(message) = convert::inbound_from_update(&update) else {
                    continue;
                };

                let handler = self
                    .handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move { handler.handle(message).await });
                    }
                    None => {
                        tracing::trace!(key = %message.seen_key(), "No subscriber, event dropped");
                    }
                }
            }
        }
    }
}
