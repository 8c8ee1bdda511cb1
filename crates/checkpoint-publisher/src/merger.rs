use tracing::{debug, warn};

use crate::batcher;
use crate::error::{Error, Result};
use crate::ledger::{self, Checkpoint};

/// Remote source of block headers.
pub trait BlockSource {
    /// Current height of the network.
    fn network_height(&self) -> Result<u64>;

    /// Every header the source knows at or below `height`, within the
    /// source's own bulk window.
    fn headers_up_to(&self, height: u64) -> Result<Vec<Checkpoint>>;
}

/// Fetches the checkpoints in `(start, end]` and renders them as ledger lines.
///
/// Batches are fetched one at a time, lowest bound first. The block API rate
/// limits callers, so this must not fan out. Any batch failure aborts the
/// whole retrieval; a partial ledger is never returned.
pub fn retrieve(source: &dyn BlockSource, start: u64, end: u64, batch_size: u64) -> Result<String> {
    let checkpoints = collect(source, start, end, batch_size)?;
    Ok(ledger::serialize(&checkpoints))
}

/// Same as [`retrieve`] but returns the merged checkpoints.
pub fn collect(
    source: &dyn BlockSource,
    start: u64,
    end: u64,
    batch_size: u64,
) -> Result<Vec<Checkpoint>> {
    let bounds = batcher::plan(start, end, batch_size)?;
    let mut merged: Vec<Checkpoint> = Vec::new();

    for bound in bounds {
        let batch = source
            .headers_up_to(bound)
            .map_err(|e| Error::fetch(bound, e))?;
        debug!(bound, records = batch.len(), "fetched checkpoint batch");

        for cp in batch {
            if cp.height <= start || cp.height > end {
                continue;
            }
            ledger::validate_hash(&cp.hash).map_err(|e| Error::fetch(bound, e))?;
            merged.push(cp);
        }
    }

    // Stable: among equal heights, fetch order decides which record survives.
    merged.sort_by_key(|cp| cp.height);
    merged.dedup_by(|later, first| {
        if later.height != first.height {
            return false;
        }
        if later.hash != first.hash {
            warn!(
                height = first.height,
                kept = %first.hash,
                dropped = %later.hash,
                "block source returned conflicting hashes for one height"
            );
        }
        true
    });

    Ok(merged)
}
