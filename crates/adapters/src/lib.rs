//! dropwatch adapters crate
//!
//! Infrastructure adapters implementing the domain ports:
//! - `dedup`: SQLite and in-memory seen-key stores
//! - `telegram`: Bot API source channel and media downloader
//! - `discord`: webhook publisher
//! - `outbox`: JSONL publisher used instead of the webhook
//! - `ocr`: Tesseract recognizer, ffmpeg frame sampler, image preprocessor

mod dedup_memory;
mod dedup_sqlite;

pub mod discord;
pub mod ocr;
pub mod outbox;
pub mod telegram;

/// Re-exports for dedup stores
pub mod dedup {
    pub use crate::dedup_memory::InMemoryDedupStore;
    pub use crate::dedup_sqlite::SqliteDedupStore;
}
