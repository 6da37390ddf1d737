//! Durable checkpoint storage.
//!
//! A checkpoint records which items of a *generation* (source + scope +
//! recency window) are already done. Membership only grows, so a rerun of
//! the same command resumes exactly where the previous one stopped.
//!
//! ## Directory Structure
//!
//! ```text
//! data/checkpoints/
//! ├── otodom_gdansk_done.json              # full scan (legacy naming)
//! ├── otodom_gdansk_last30d_done.json      # 30-day window
//! └── morizon_pomorskie_last7d_done.json
//! ```

pub mod local;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{Scope, Source, recency_bucket};

// Re-export for convenience
pub use local::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Identity of one checkpoint: source, scope key and recency bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation {
    key: String,
    source: Source,
    scope_key: String,
    bucket: String,
}

impl Generation {
    pub fn new(source: Source, scope_key: &str, recency_window_days: u32) -> Self {
        let bucket = recency_bucket(recency_window_days);
        let key = generation_key(source, scope_key, &bucket);
        Self {
            key,
            source,
            scope_key: scope_key.to_string(),
            bucket,
        }
    }

    pub fn for_scope(scope: &Scope) -> Self {
        Self::new(scope.source, &scope.key, scope.recency_window_days)
    }

    /// Stable hash identifying this generation.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// File name of the durable record; full scans keep the legacy suffix-free name.
    pub fn file_name(&self) -> String {
        let scope: String = self
            .scope_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();

        if self.bucket == "full" {
            format!("{}_{}_done.json", self.source, scope)
        } else {
            format!("{}_{}_{}_done.json", self.source, scope, self.bucket)
        }
    }
}

/// Hash of (source, scope key, recency bucket), hex-encoded.
pub fn generation_key(source: Source, scope_key: &str, bucket: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(scope_key.as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Set of done item ids for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    #[serde(default)]
    pub generation_key: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub scope_key: String,
    #[serde(default)]
    pub recency_bucket: String,
    #[serde(default)]
    pub done: BTreeSet<String>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    pub fn empty(generation: &Generation) -> Self {
        Self {
            generation_key: generation.key().to_string(),
            source: generation.source().to_string(),
            scope_key: generation.scope_key().to_string(),
            recency_bucket: generation.bucket().to_string(),
            done: BTreeSet::new(),
            last_updated_at: None,
        }
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.done.contains(item_id)
    }

    /// Add an item; returns whether it was new.
    pub fn insert(&mut self, item_id: &str) -> bool {
        let added = self.done.insert(item_id.to_string());
        if added {
            self.last_updated_at = Some(Utc::now());
        }
        added
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

/// Keyed store of checkpoint records.
///
/// Implementations serialize writes per store; one process per generation
/// is assumed.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the record, creating an empty one if none exists yet.
    async fn load(&self, generation: &Generation) -> Result<CheckpointRecord>;

    async fn is_done(&self, generation: &Generation, item_id: &str) -> Result<bool>;

    /// Mark an item done. Idempotent; returns whether the item was new.
    async fn mark_done(&self, generation: &Generation, item_id: &str) -> Result<bool>;

    /// Persist the record atomically.
    async fn flush(&self, generation: &Generation) -> Result<()>;

    /// Start the generation over from an empty record.
    ///
    /// Used to repair an unreadable record; the durable copy is set aside,
    /// never deleted.
    async fn discard(&self, generation: &Generation) -> Result<()>;
}
