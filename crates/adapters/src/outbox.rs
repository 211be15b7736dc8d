//! Outbox publisher: appends notices to a JSONL file instead of sending them.
//!
//! Each line is one self-contained notice with its own uuid and write time, so
//! the file can be tailed or replayed into a webhook later. The file is opened in
//! append mode and each line is written in one call under the file lock.

use async_trait::async_trait;
use dropwatch_domain::model::{Condition, Notice};
use dropwatch_domain::ports::{PublishError, Publisher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only JSON lines file
#[derive(Debug, Clone)]
pub struct OutboxWriter {
    path: PathBuf,
    file: Arc<Mutex<fs::File>>,
}

impl OutboxWriter {
    /// Open (or create) the file, creating missing parent directories
    pub async fn new(path: PathBuf) -> Result<Self, OutboxError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await?,
            _ => {}
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `value` as one line and append it
    pub async fn append<T: Serialize>(&self, value: &T) -> Result<(), OutboxError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Publisher writing each notice as one JSON line
#[derive(Debug, Clone)]
pub struct OutboxPublisher {
    writer: OutboxWriter,
}

impl OutboxPublisher {
    pub fn new(writer: OutboxWriter) -> Self {
        Self { writer }
    }
}

#[derive(Serialize)]
struct OutboxEntry<'a> {
    id: String,
    written_at: String,
    source_key: &'a str,
    code: &'a str,
    title: &'a str,
    description: &'a str,
    url: &'a str,
    fields: &'a [Condition],
}

#[async_trait]
impl Publisher for OutboxPublisher {
    async fn publish(&self, notice: &Notice) -> Result<(), PublishError> {
        let written_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| PublishError::Io(e.to_string()))?;
        let entry = OutboxEntry {
            id: Uuid::new_v4().to_string(),
            written_at,
            source_key: &notice.source_key,
            code: &notice.code,
            title: &notice.title,
            description: &notice.description,
            url: &notice.url,
            fields: &notice.fields,
        };

        self.writer
            .append(&entry)
            .await
            .map_err(|error| PublishError::Io(format!("Outbox write failed: {}", error)))?;

        tracing::debug!(path = %self.writer.path().display(), key = %notice.source_key, "Notice written to outbox");
        Ok(())
    }

    fn platform(&self) -> &'static str {
        "outbox"
    }
}
