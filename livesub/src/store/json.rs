//! JSON-file backed streamer store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{LiveStatus, StreamerRecord, StreamerStore};
use crate::utils::fs;
use crate::{Error, Result};

/// Streamer store holding records in memory, written through to a JSON file.
pub struct JsonStreamerStore {
    path: Option<PathBuf>,
    records: RwLock<Vec<StreamerRecord>>,
}

impl JsonStreamerStore {
    /// Open (or create) a store backed by the file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<StreamerRecord>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::ensure_parent_dir_with_op("creating store directory", &path).await?;
                Vec::new()
            }
            Err(e) => return Err(Error::io_path("reading streamer store", &path, e)),
        };

        info!(path = %path.display(), count = records.len(), "Loaded streamer store");

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::with_records(Vec::new())
    }

    /// An in-memory store seeded with `records`.
    pub fn with_records(records: Vec<StreamerRecord>) -> Self {
        Self {
            path: None,
            records: RwLock::new(records),
        }
    }

    /// Insert or replace a record by id.
    pub async fn upsert(&self, record: StreamerRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.persist(&records).await
    }

    /// Write the records to disk. Called with the write lock held so that
    /// concurrent writers cannot interleave file contents.
    async fn persist(&self, records: &[StreamerRecord]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::io_path("writing streamer store", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::io_path("replacing streamer store", path, e))?;

        debug!(path = %path.display(), count = records.len(), "Persisted streamer store");
        Ok(())
    }
}

fn find_by_channel<'a>(
    records: &'a mut [StreamerRecord],
    channel_id: &str,
) -> Option<&'a mut StreamerRecord> {
    records
        .iter_mut()
        .find(|r| r.channel_id() == Some(channel_id))
}

#[async_trait]
impl StreamerStore for JsonStreamerStore {
    async fn get(&self, id: &str) -> Result<StreamerRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("Streamer", id))
    }

    async fn list(&self) -> Result<Vec<StreamerRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn update_youtube_live_status(
        &self,
        channel_id: &str,
        mut status: LiveStatus,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = find_by_channel(&mut records, channel_id)
            .ok_or_else(|| Error::not_found("YouTube channel", channel_id))?;

        status.updated_at.get_or_insert_with(Utc::now);
        record.live = status;

        self.persist(&records).await
    }

    async fn record_lease(
        &self,
        channel_id: &str,
        verified_at: DateTime<Utc>,
        lease_seconds: Option<i64>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = find_by_channel(&mut records, channel_id)
            .ok_or_else(|| Error::not_found("YouTube channel", channel_id))?;

        if let Some(yt) = record.youtube.as_mut() {
            yt.hub_lease_date = Some(verified_at.to_rfc3339_opts(SecondsFormat::Secs, true));
            if let Some(secs) = lease_seconds.filter(|s| *s > 0) {
                yt.lease_seconds = secs;
            }
        }

        self.persist(&records).await
    }
}
