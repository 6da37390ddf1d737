// src/pipeline/log_sync.rs

//! Rebuild a checkpoint from a captured run log.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{ErrorKind, Result};
use crate::storage::{CheckpointStore, Generation};
use crate::utils::log::parse_delivered;

/// Union every delivered item found in `log_path` into the generation's done-set.
///
/// Lines tagged with a different generation are ignored; untagged lines
/// (older log formats) are attributed to the target generation. Existing
/// entries are never removed, so running this twice changes nothing.
/// An unreadable checkpoint is set aside and rebuilt from the log alone;
/// lines that are not valid UTF-8 are decoded lossily.
/// Returns the number of newly added items.
pub async fn sync_done_from_log(
    store: &dyn CheckpointStore,
    generation: &Generation,
    log_path: &Path,
) -> Result<usize> {
    let file = tokio::fs::File::open(log_path).await?;
    let mut reader = BufReader::new(file);

    let before = match store.load(generation).await {
        Ok(record) => record.len(),
        Err(e) if e.kind() == ErrorKind::CheckpointIo => {
            log::warn!("Checkpoint unreadable, rebuilding from the log: {}", e);
            store.discard(generation).await?;
            0
        }
        Err(e) => return Err(e),
    };
    let mut seen = 0usize;
    let mut foreign = 0usize;
    let mut added = 0usize;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let Some(event) = parse_delivered(line.trim_end_matches(['\r', '\n'])) else {
            continue;
        };
        if event
            .generation
            .as_deref()
            .is_some_and(|key| key != generation.key())
        {
            foreign += 1;
            continue;
        }
        seen += 1;
        if store.mark_done(generation, &event.item_id).await? {
            added += 1;
        }
    }
    store.flush(generation).await?;

    log::info!(
        "{}: {} delivery events, {} newly done ({} before), {} from other generations ignored",
        log_path.display(),
        seen,
        added,
        before,
        foreign
    );
    Ok(added)
}
