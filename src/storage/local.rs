//! Local filesystem checkpoint store.
//!
//! One JSON file per generation under the checkpoint directory. Records are
//! cached in memory after the first load; every write goes to a temporary
//! file that is synced and then renamed over the durable one, so a crash
//! never leaves a half-written record behind.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::{CheckpointRecord, CheckpointStore, Generation};

struct CachedRecord {
    record: CheckpointRecord,
    /// Items added since the last successful write
    unflushed: usize,
}

/// Filesystem-backed checkpoint store.
pub struct FileCheckpointStore {
    root_dir: PathBuf,
    flush_every: usize,
    records: Mutex<HashMap<String, CachedRecord>>,
}

impl FileCheckpointStore {
    /// Create a store rooted at the given directory, persisting on every new item.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            flush_every: 1,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Persist after every `n` newly done items instead of every one.
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n.max(1);
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Full path of a generation's record.
    pub fn path_for(&self, generation: &Generation) -> PathBuf {
        self.root_dir.join(generation.file_name())
    }

    /// Read a record from disk; a missing file is an empty record.
    async fn read_record(&self, generation: &Generation) -> Result<CheckpointRecord> {
        let path = self.path_for(generation);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckpointRecord::empty(generation));
            }
            Err(e) => return Err(AppError::checkpoint(path.display(), e)),
        };

        let mut record: CheckpointRecord = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::checkpoint(path.display(), format!("corrupt record: {e}")))?;

        if record.generation_key.is_empty() {
            // Written before records carried their identity.
            let done = std::mem::take(&mut record.done);
            let last_updated_at = record.last_updated_at;
            record = CheckpointRecord::empty(generation);
            record.done = done;
            record.last_updated_at = last_updated_at;
        } else if record.generation_key != generation.key() {
            return Err(AppError::checkpoint(
                path.display(),
                format!(
                    "record belongs to generation {}, expected {}",
                    record.generation_key,
                    generation.key()
                ),
            ));
        }

        Ok(record)
    }

    /// Write a record atomically (write to temp, sync, rename, sync the directory).
    async fn write_record(&self, path: &Path, record: &CheckpointRecord) -> Result<()> {
        let io_err = |e: std::io::Error| AppError::checkpoint(path.display(), e);

        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

        // The rename itself is only durable once the directory entry is.
        if let Some(parent) = parent {
            sync_dir(parent).await.map_err(io_err)?;
        }
        Ok(())
    }

    /// Path an unreadable record is moved to before starting over.
    fn set_aside_path(&self, generation: &Generation) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        self.path_for(generation)
            .with_extension(format!("json.corrupt-{stamp}"))
    }

    async fn cached<'a>(
        &self,
        records: &'a mut HashMap<String, CachedRecord>,
        generation: &Generation,
    ) -> Result<&'a mut CachedRecord> {
        match records.entry(generation.key().to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = self.read_record(generation).await?;
                log::debug!(
                    "Loaded checkpoint {} with {} done items",
                    generation.file_name(),
                    record.len()
                );
                Ok(entry.insert(CachedRecord {
                    record,
                    unflushed: 0,
                }))
            }
        }
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, generation: &Generation) -> Result<CheckpointRecord> {
        let mut records = self.records.lock().await;
        let cached = self.cached(&mut records, generation).await?;
        Ok(cached.record.clone())
    }

    async fn is_done(&self, generation: &Generation, item_id: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        let cached = self.cached(&mut records, generation).await?;
        Ok(cached.record.contains(item_id))
    }

    async fn mark_done(&self, generation: &Generation, item_id: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        let cached = self.cached(&mut records, generation).await?;

        let added = cached.record.insert(item_id);
        if added {
            cached.unflushed += 1;
            if cached.unflushed >= self.flush_every {
                self.write_record(&self.path_for(generation), &cached.record)
                    .await?;
                cached.unflushed = 0;
            }
        }
        Ok(added)
    }

    async fn flush(&self, generation: &Generation) -> Result<()> {
        let mut records = self.records.lock().await;
        let cached = self.cached(&mut records, generation).await?;
        self.write_record(&self.path_for(generation), &cached.record)
            .await?;
        cached.unflushed = 0;
        Ok(())
    }

    async fn discard(&self, generation: &Generation) -> Result<()> {
        let mut records = self.records.lock().await;
        let path = self.path_for(generation);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let aside = self.set_aside_path(generation);
            tokio::fs::rename(&path, &aside)
                .await
                .map_err(|e| AppError::checkpoint(path.display(), e))?;
            log::warn!("Moved {} to {}", path.display(), aside.display());
        }

        records.insert(
            generation.key().to_string(),
            CachedRecord {
                record: CheckpointRecord::empty(generation),
                unflushed: 0,
            },
        );
        Ok(())
    }
}
