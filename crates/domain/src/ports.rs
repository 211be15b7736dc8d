//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{InboundMessage, MediaAttachment, Notice, Recognition};

/// Error type for source channel operations
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Media download failed: {0}")]
    Download(String),
}

/// Receives every inbound message and edit event
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

/// Port for the source messaging channel session
#[async_trait]
pub trait SourceChannel: Send + Sync {
    /// Establish a session
    async fn connect(&self) -> Result<(), SourceError>;

    /// Close the session
    async fn disconnect(&self) -> Result<(), SourceError>;

    /// Whether the session currently reports itself live
    fn is_connected(&self) -> bool;

    /// Lightweight liveness call
    async fn ping(&self) -> Result<(), SourceError>;

    /// Route message and edit events to `handler`, replacing any previous one
    fn subscribe(&self, handler: Arc<dyn MessageHandler>);

    /// Stop routing events
    fn unsubscribe(&self);

    /// Get the platform name (e.g., "telegram")
    fn platform(&self) -> &'static str;
}

/// Port for fetching attachment bytes by reference
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(
        &self,
        media: &MediaAttachment,
        destination: &Path,
    ) -> Result<(), SourceError>;
}

/// Error type for publisher operations
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
}

/// Port for the destination messaging channel
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver a rendered notice
    async fn publish(&self, notice: &Notice) -> Result<(), PublishError>;

    /// Get the platform name (e.g., "discord", "outbox")
    fn platform(&self) -> &'static str;
}

/// Error type for state store operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// Result of recording a key in the dedup store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key already existed (primary-key conflict)
    AlreadyPresent,
}

/// Port for the persisted seen-key ledger
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn contains(&self, key: &str) -> Result<bool, StateError>;

    /// Record `key` with a timestamp in epoch milliseconds
    async fn insert(&self, key: &str, ts_millis: i64) -> Result<InsertOutcome, StateError>;

    /// Delete entries recorded before `cutoff_millis`, returning how many were removed
    async fn purge_older_than(&self, cutoff_millis: i64) -> Result<u64, StateError>;
}

/// Error type for text recognition
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Recognition engine error: {0}")]
    Engine(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Invalid engine output: {0}")]
    InvalidOutput(String),
    #[error("Timeout")]
    Timeout,
}

/// Port for the OCR engine
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<Recognition, RecognitionError>;
}

/// Error type for image and video processing
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Subprocess failed: {0}")]
    Subprocess(String),
}

/// Port for preparing an image before recognition
#[async_trait]
pub trait ImagePreprocessor: Send + Sync {
    /// Write a recognition-friendly version of `input` to `output`
    async fn preprocess(&self, input: &Path, output: &Path) -> Result<(), MediaError>;
}

/// Port for sampling still frames out of a video
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Write frames sampled at `fps` from the final `tail` of `video` into
    /// `output_dir`, returning their paths
    async fn extract_tail_frames(
        &self,
        video: &Path,
        tail: Duration,
        fps: u32,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, MediaError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;

    /// Current time in epoch milliseconds
    fn now_millis(&self) -> i64 {
        (self.now().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Port for backoff delays (enables deterministic testing)
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
