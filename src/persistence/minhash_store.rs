// * Minhash Store
// * Append-only batched signature files plus the crash-safe checkpoint
// * machinery. Each batch commits as a transaction guarded by an on-disk
// * lock sentinel; interrupted transactions roll back to the previous
// * checkpoint on the next open.

use crate::engine::minhash::Signature;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{info, warn};

// * Batch files are minhashes_<start_offset>.bin
static MINHASH_FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^minhashes_(\d+)\.bin$").unwrap());

const CHECKPOINT_FILE: &str = "checkpoint";
const CHECKPOINT_TEMP_FILE: &str = "checkpoint.tmp";
const CHECKPOINT_OLD_FILE: &str = "checkpoint.old";
const TRANSACTION_LOCK_FILE: &str = ".transaction_lock";

// * Unified Error type for the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Refusing to commit an empty batch")]
    EmptyBatch,

    #[error("Batch start {found} does not continue from checkpoint (expected {expected})")]
    BatchOutOfSequence { expected: u64, found: u64 },

    #[error("Offsets within batch not contiguous: expected {expected}, found {found}")]
    BatchNotContiguous { expected: u64, found: u64 },

    #[error("Minhash stream offset gap: expected {expected}, found {found} in {file}")]
    OffsetGap {
        expected: u64,
        found: u64,
        file: String,
    },
}

/// One persisted (offset, signature) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinhashRecord {
    pub offset: u64,
    pub signature: Signature,
}

/// Handle to the on-disk working directory of minhash batches
#[derive(Debug)]
pub struct MinhashStore {
    working_directory: PathBuf,
}

impl MinhashStore {
    /// Opens (creating if necessary) a working directory and runs recovery
    pub fn open(working_directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            working_directory: working_directory.into(),
        };
        fs::create_dir_all(&store.working_directory)?;
        store.recover()?;
        Ok(store)
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Rolls back a transaction interrupted by a crash
    ///
    /// A present lock sentinel means the previous process died somewhere in
    /// the commit sequence. The previous checkpoint is restored and the
    /// in-flight batch is forgotten; its file (if it landed) is overwritten
    /// when the batch regenerates.
    fn recover(&self) -> Result<(), StoreError> {
        let lock = self.path_of(TRANSACTION_LOCK_FILE);
        if !lock.exists() {
            return Ok(());
        }

        warn!("Transaction lock found, rolling back interrupted commit");

        let temp = self.path_of(CHECKPOINT_TEMP_FILE);
        if temp.exists() {
            let old = self.path_of(CHECKPOINT_OLD_FILE);
            if old.exists() {
                fs::rename(&old, self.path_of(CHECKPOINT_FILE))?;
            }
            fs::remove_file(&temp)?;
        }

        fs::remove_file(&lock)?;
        Ok(())
    }

    /// Highest offset whose batch is durably committed
    pub fn checkpoint(&self) -> Result<Option<u64>, StoreError> {
        let path = self.path_of(CHECKPOINT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(Some(bincode::deserialize_from(reader)?))
    }

    /// Offset the next generation run must start from
    pub fn resume_offset(&self) -> Result<u64, StoreError> {
        Ok(match self.checkpoint()? {
            Some(checkpoint) => checkpoint + 1,
            None => 0,
        })
    }

    /// Commits one batch of records as a transaction
    ///
    /// Sequence: lock sentinel, batch file (temp-then-rename), checkpoint
    /// temp, checkpoint rotation, lock removal. Records must be contiguous
    /// and continue exactly where the checkpoint left off.
    pub fn commit_batch(&self, records: &[MinhashRecord]) -> Result<(), StoreError> {
        let first = records.first().ok_or(StoreError::EmptyBatch)?;
        let expected_start = self.resume_offset()?;
        if first.offset != expected_start {
            return Err(StoreError::BatchOutOfSequence {
                expected: expected_start,
                found: first.offset,
            });
        }
        for (index, record) in records.iter().enumerate() {
            let expected = first.offset + index as u64;
            if record.offset != expected {
                return Err(StoreError::BatchNotContiguous {
                    expected,
                    found: record.offset,
                });
            }
        }
        let last_offset = records[records.len() - 1].offset;

        // * Commence transaction
        File::create(self.path_of(TRANSACTION_LOCK_FILE))?;

        let batch_path = self.path_of(&format!("minhashes_{}.bin", first.offset));
        let temp_path = batch_path.with_extension("bin.tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        bincode::serialize_into(writer, &records)?;
        fs::rename(&temp_path, &batch_path)?;

        let checkpoint_temp = self.path_of(CHECKPOINT_TEMP_FILE);
        let writer = BufWriter::new(File::create(&checkpoint_temp)?);
        bincode::serialize_into(writer, &last_offset)?;

        let checkpoint = self.path_of(CHECKPOINT_FILE);
        if checkpoint.exists() {
            fs::rename(&checkpoint, self.path_of(CHECKPOINT_OLD_FILE))?;
        }
        fs::rename(&checkpoint_temp, &checkpoint)?;

        // * Transaction finished
        fs::remove_file(self.path_of(TRANSACTION_LOCK_FILE))?;

        info!(
            start_offset = first.offset,
            last_offset,
            records = records.len(),
            "Minhash batch committed"
        );
        Ok(())
    }

    /// Batch files sorted numerically by start offset
    pub fn batch_files(&self) -> Result<Vec<(u64, PathBuf)>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.working_directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(captures) = MINHASH_FILE_REGEX.captures(name) {
                // * Filename offsets always fit u64 by construction
                let start: u64 = captures[1].parse().unwrap_or(u64::MAX);
                files.push((start, entry.path()));
            }
        }
        files.sort_unstable_by_key(|(start, _)| *start);
        Ok(files)
    }

    /// Streams all records in offset order, enforcing density
    pub fn iter(&self) -> Result<MinhashIter, StoreError> {
        Ok(MinhashIter {
            files: self.batch_files()?.into_iter(),
            current: Vec::new().into_iter(),
            current_file: String::new(),
            next_expected: 0,
        })
    }

    /// Mirrors every file of the working directory into a backup directory
    pub fn mirror_to(&self, backup_dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(backup_dir)?;
        for entry in fs::read_dir(&self.working_directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), backup_dir.join(entry.file_name()))?;
            }
        }
        Ok(())
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.working_directory.join(name)
    }
}

/// Lazy, single-pass, offset-ordered record stream across batch files
pub struct MinhashIter {
    files: std::vec::IntoIter<(u64, PathBuf)>,
    current: std::vec::IntoIter<MinhashRecord>,
    current_file: String,
    next_expected: u64,
}

impl Iterator for MinhashIter {
    type Item = Result<MinhashRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                if record.offset != self.next_expected {
                    return Some(Err(StoreError::OffsetGap {
                        expected: self.next_expected,
                        found: record.offset,
                        file: self.current_file.clone(),
                    }));
                }
                self.next_expected += 1;
                return Some(Ok(record));
            }

            let (start, path) = self.files.next()?;
            self.current_file = path.display().to_string();
            if start != self.next_expected {
                return Some(Err(StoreError::OffsetGap {
                    expected: self.next_expected,
                    found: start,
                    file: self.current_file.clone(),
                }));
            }

            let records: Vec<MinhashRecord> = match File::open(&path)
                .map_err(StoreError::from)
                .and_then(|file| {
                    bincode::deserialize_from(BufReader::new(file)).map_err(StoreError::from)
                }) {
                Ok(records) => records,
                Err(error) => return Some(Err(error)),
            };
            self.current = records.into_iter();
        }
    }
}
