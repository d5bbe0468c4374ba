// * Dedupe Engine
// * Single streaming pass over the minhash store against a fully built LSH.
// * A document matching any earlier survivor is recorded once and removed
// * from the index, so clusters never chain: the earliest member survives
// * and every later member points at a witness set containing it.

use crate::config::constants::{DEFAULT_LSH_THRESHOLD, DUPLICATE_SAVE_FREQUENCY, MIN_FREE_SPACE_RATIO, NUM_PERMUTATIONS};
use crate::engine::lsh::{LshError, LshIndex};
use crate::persistence::duplicates_store::{DuplicateRecord, DuplicatesStore};
use crate::persistence::minhash_store::{MinhashStore, StoreError};
use std::path::Path;
use sysinfo::Disks;
use thiserror::Error;
use tracing::{debug, info};

// * Unified Error type for the dedupe phase
#[derive(Error, Debug)]
pub enum DedupeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Lsh(#[from] LshError),

    #[error("lsh_threshold must be within (0, 1), got {0}")]
    InvalidThreshold(f64),

    #[error("Insufficient free space on output volume ({available} of {total} bytes free)")]
    DiskSpaceExhausted { available: u64, total: u64 },
}

/// Configuration for the dedupe phase
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// LSH match threshold, higher means LESS deduplication
    pub lsh_threshold: f64,
    /// Duplicate records per output batch
    pub save_frequency: usize,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            lsh_threshold: DEFAULT_LSH_THRESHOLD,
            save_frequency: DUPLICATE_SAVE_FREQUENCY,
        }
    }
}

/// Outcome of a dedupe run
#[derive(Debug, Clone)]
pub struct DedupeSummary {
    pub total_duplicates: u64,
    pub documents_scanned: u64,
    /// True when a previous completed run made this one a no-op
    pub skipped: bool,
}

/// Runs the dedupe pass end to end
///
/// Builds (or reloads) the LSH over every stored signature, then streams the
/// store in offset order recording duplicates. Re-running after completion
/// is a no-op thanks to the completion sentinel.
pub fn run_dedupe(
    minhashes_directory: &Path,
    duplicates_directory: &Path,
    config: DedupeConfig,
) -> Result<DedupeSummary, DedupeError> {
    if config.lsh_threshold <= 0.0 || config.lsh_threshold >= 1.0 {
        return Err(DedupeError::InvalidThreshold(config.lsh_threshold));
    }
    let save_frequency = config.save_frequency.max(1);

    let duplicates_store = DuplicatesStore::open(duplicates_directory)?;
    if duplicates_store.is_complete() {
        info!("Dedupe already completed");
        return Ok(DedupeSummary {
            total_duplicates: 0,
            documents_scanned: 0,
            skipped: true,
        });
    }

    let minhash_store = MinhashStore::open(minhashes_directory)?;
    let mut lsh = load_or_build_lsh(&minhash_store, &duplicates_store, config.lsh_threshold)?;

    let mut batch: Vec<DuplicateRecord> = Vec::new();
    let mut batch_number = 0usize;
    let mut duplicate_count = 0u64;
    let mut documents_scanned = 0u64;

    for record in minhash_store.iter()? {
        let record = record?;
        documents_scanned += 1;

        // * Witnesses are the earlier survivors only; later cluster members
        // * still get their turn as the stream advances
        let hits = lsh.query(&record.signature);
        let matches: Vec<u64> = hits.into_iter().filter(|&hit| hit < record.offset).collect();
        if !matches.is_empty() {
            batch.push(DuplicateRecord {
                offset: record.offset,
                matches,
            });
            duplicate_count += 1;
            // * Only remove self; the survivors stay indexed so later cluster
            // * members still find them
            lsh.remove(record.offset, &record.signature);
        }

        if batch.len() == save_frequency {
            ensure_disk_space(duplicates_store.directory())?;
            duplicates_store.save_batch(batch_number, &batch)?;
            batch_number += 1;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        ensure_disk_space(duplicates_store.directory())?;
        duplicates_store.save_batch(batch_number, &batch)?;
    }

    duplicates_store.save_statistics(duplicate_count, config.lsh_threshold)?;
    duplicates_store.mark_complete()?;

    info!(
        documents_scanned,
        total_duplicates = duplicate_count,
        "Dedupe complete"
    );
    Ok(DedupeSummary {
        total_duplicates: duplicate_count,
        documents_scanned,
        skipped: false,
    })
}

/// Reloads the serialized index or builds it from the minhash store
fn load_or_build_lsh(
    minhash_store: &MinhashStore,
    duplicates_store: &DuplicatesStore,
    lsh_threshold: f64,
) -> Result<LshIndex, DedupeError> {
    let lsh_path = duplicates_store.lsh_path();
    if lsh_path.exists() {
        info!("Loading LSH from sidecar file");
        let lsh = LshIndex::load(&lsh_path)?;
        info!(
            threshold = lsh.threshold(),
            bands = lsh.num_bands(),
            "LSH load complete"
        );
        return Ok(lsh);
    }

    info!(threshold = lsh_threshold, "Building LSH");
    let mut lsh = LshIndex::new(lsh_threshold, NUM_PERMUTATIONS);
    let mut inserted = 0u64;
    for record in minhash_store.iter()? {
        let record = record?;
        lsh.insert(record.offset, &record.signature);
        inserted += 1;
        if inserted % 1_000_000 == 0 {
            debug!(inserted, "LSH build progress");
        }
    }

    info!(inserted, "Dumping LSH");
    lsh.save(&lsh_path)?;
    Ok(lsh)
}

/// Fails fast when the output volume is nearly full
fn ensure_disk_space(path: &Path) -> Result<(), DedupeError> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    // * Longest mount-point prefix wins
    let mut best: Option<(u64, u64)> = None;
    let mut best_len = 0;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) && mount.as_os_str().len() >= best_len {
            best_len = mount.as_os_str().len();
            best = Some((disk.available_space(), disk.total_space()));
        }
    }

    let Some((available, total)) = best else {
        // * Volume not visible, nothing to check
        return Ok(());
    };
    if total == 0 {
        return Ok(());
    }
    if (available as f64 / total as f64) <= MIN_FREE_SPACE_RATIO {
        return Err(DedupeError::DiskSpaceExhausted { available, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_must_be_in_open_interval() {
        let dir = tempfile::tempdir().unwrap();
        for bad in [0.0, 1.0, -0.2, 1.7] {
            let config = DedupeConfig {
                lsh_threshold: bad,
                ..DedupeConfig::default()
            };
            let result = run_dedupe(dir.path(), dir.path(), config);
            assert!(matches!(result, Err(DedupeError::InvalidThreshold(_))));
        }
    }

    #[test]
    fn test_completed_run_is_skipped() {
        let minhashes_dir = tempfile::tempdir().unwrap();
        let duplicates_dir = tempfile::tempdir().unwrap();

        let store = DuplicatesStore::open(duplicates_dir.path()).unwrap();
        store.mark_complete().unwrap();

        let summary = run_dedupe(
            minhashes_dir.path(),
            duplicates_dir.path(),
            DedupeConfig::default(),
        )
        .unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.documents_scanned, 0);
    }
}
