//! In-memory checkpoint store for tests and dry runs.
//!
//! Keeps a working copy and a "persisted" copy per generation so tests can
//! observe exactly what a crash would have left behind.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::storage::{CheckpointRecord, CheckpointStore, Generation};

#[derive(Default)]
struct Slot {
    working: Option<CheckpointRecord>,
    persisted: Option<CheckpointRecord>,
}

/// Volatile checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slots: Mutex<HashMap<String, Slot>>,
    flushes: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a generation with items that are already done and persisted.
    pub fn with_done<I, S>(self, generation: &Generation, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut record = CheckpointRecord::empty(generation);
        for item in items {
            record.insert(item.as_ref());
        }
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(
                generation.key().to_string(),
                Slot {
                    working: Some(record.clone()),
                    persisted: Some(record),
                },
            );
        }
        self
    }

    /// Number of flush calls seen so far.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// The record as of the last flush, if any.
    pub fn persisted(&self, generation: &Generation) -> Option<CheckpointRecord> {
        let slots = self.slots.lock().ok()?;
        slots.get(generation.key())?.persisted.clone()
    }

    fn with_record<T>(
        &self,
        generation: &Generation,
        f: impl FnOnce(&mut CheckpointRecord, &mut Option<CheckpointRecord>) -> T,
    ) -> Result<T> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| AppError::checkpoint(generation.file_name(), "store lock poisoned"))?;
        let slot = slots.entry(generation.key().to_string()).or_default();
        let working = slot.working.get_or_insert_with(|| CheckpointRecord::empty(generation));
        Ok(f(working, &mut slot.persisted))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, generation: &Generation) -> Result<CheckpointRecord> {
        self.with_record(generation, |record, _| record.clone())
    }

    async fn is_done(&self, generation: &Generation, item_id: &str) -> Result<bool> {
        self.with_record(generation, |record, _| record.contains(item_id))
    }

    async fn mark_done(&self, generation: &Generation, item_id: &str) -> Result<bool> {
        self.with_record(generation, |record, _| record.insert(item_id))
    }

    async fn flush(&self, generation: &Generation) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.with_record(generation, |record, persisted| {
            *persisted = Some(record.clone());
        })
    }

    async fn discard(&self, generation: &Generation) -> Result<()> {
        self.with_record(generation, |record, _| {
            *record = CheckpointRecord::empty(generation);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    #[tokio::test]
    async fn test_flush_snapshots_working_copy() {
        let generation = Generation::new(Source::Otodom, "sopot", 7);
        let store = MemoryCheckpointStore::new();

        store.mark_done(&generation, "a").await.unwrap();
        assert!(store.persisted(&generation).is_none());

        store.flush(&generation).await.unwrap();
        assert_eq!(store.persisted(&generation).unwrap().len(), 1);
        assert_eq!(store.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_seeded_items_are_done() {
        let generation = Generation::new(Source::Morizon, "gdynia", 0);
        let store = MemoryCheckpointStore::new().with_done(&generation, ["x", "y"]);

        assert!(store.is_done(&generation, "x").await.unwrap());
        assert!(!store.is_done(&generation, "z").await.unwrap());
    }
}
