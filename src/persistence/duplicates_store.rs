// * Duplicates Store
// * Write-only log of duplicate batches plus the compact offset-only "smol"
// * variant, the statistics artifact and the completion sentinel.

use crate::persistence::minhash_store::StoreError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;

// * Full batches are duplicates_<batch:04>.bin, the offset-only variant is
// * duplicates_smol_<batch:04>.bin
static DUPLICATES_FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^duplicates_(\d+)\.bin$").unwrap());
static DUPLICATES_SMOL_FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^duplicates_smol_(\d+)\.bin$").unwrap());

const STATISTICS_FILE: &str = "duplicate_statistics.json";
const DONE_FILE: &str = "dedupe.done";
const LSH_FILE: &str = "lsh.bin";

/// One duplicate assertion: `offset` is a near-duplicate of every offset in
/// `matches`, all of which are earlier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub offset: u64,
    pub matches: Vec<u64>,
}

/// Statistics artifact written once the dedupe pass completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateStatistics {
    #[serde(rename = "Data")]
    pub data: String,

    #[serde(rename = "Total Duplicates")]
    pub total_duplicates: u64,

    #[serde(rename = "lsh_threshold")]
    pub lsh_threshold: f64,
}

/// Handle to the on-disk duplicates directory
#[derive(Debug)]
pub struct DuplicatesStore {
    directory: PathBuf,
}

impl DuplicatesStore {
    /// Opens (creating if necessary) a duplicates directory
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            directory: directory.into(),
        };
        fs::create_dir_all(&store.directory)?;
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the serialized LSH sidecar
    pub fn lsh_path(&self) -> PathBuf {
        self.directory.join(LSH_FILE)
    }

    /// True once the dedupe pass wrote its completion sentinel
    pub fn is_complete(&self) -> bool {
        self.directory.join(DONE_FILE).exists()
    }

    /// Creates the completion sentinel
    pub fn mark_complete(&self) -> Result<(), StoreError> {
        File::create(self.directory.join(DONE_FILE))?;
        Ok(())
    }

    /// Writes one duplicates batch and its offset-only companion
    pub fn save_batch(
        &self,
        batch_number: usize,
        records: &[DuplicateRecord],
    ) -> Result<(), StoreError> {
        info!(
            batch_number,
            duplicates = records.len(),
            "Dumping duplicates batch"
        );

        let batch_path = self.directory.join(format!("duplicates_{batch_number:04}.bin"));
        write_atomic(&batch_path, records)?;

        let offsets: Vec<u64> = records.iter().map(|record| record.offset).collect();
        let smol_path = self
            .directory
            .join(format!("duplicates_smol_{batch_number:04}.bin"));
        write_atomic(&smol_path, &offsets)?;

        Ok(())
    }

    /// Writes the statistics artifact, temp-then-rename
    pub fn save_statistics(
        &self,
        total_duplicates: u64,
        lsh_threshold: f64,
    ) -> Result<(), StoreError> {
        let statistics = DuplicateStatistics {
            data: "Corpus duplicate statistics".to_string(),
            total_duplicates,
            lsh_threshold,
        };

        let path = self.directory.join(STATISTICS_FILE);
        let temp_path = path.with_extension("json.tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(writer, &statistics)
            .map_err(|error| StoreError::Io(error.into()))?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Reads the statistics artifact if present
    pub fn statistics(&self) -> Result<Option<DuplicateStatistics>, StoreError> {
        let path = self.directory.join(STATISTICS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        let statistics =
            serde_json::from_reader(reader).map_err(|error| StoreError::Io(error.into()))?;
        Ok(Some(statistics))
    }

    /// Full batch files in batch order, smol variants excluded
    pub fn batch_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        self.sorted_files(&DUPLICATES_FILE_REGEX)
    }

    /// Offset-only batch files in batch order
    pub fn smol_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        self.sorted_files(&DUPLICATES_SMOL_FILE_REGEX)
    }

    /// Streams all duplicate records in batch order
    pub fn iter_records(&self) -> Result<impl Iterator<Item = Result<DuplicateRecord, StoreError>>, StoreError> {
        let files = self.batch_files()?;
        Ok(BatchStream::<DuplicateRecord> {
            files: files.into_iter(),
            current: Vec::new().into_iter(),
        })
    }

    /// Streams all duplicate offsets from the smol variant in batch order
    pub fn iter_offsets(&self) -> Result<impl Iterator<Item = Result<u64, StoreError>>, StoreError> {
        let files = self.smol_files()?;
        Ok(BatchStream::<u64> {
            files: files.into_iter(),
            current: Vec::new().into_iter(),
        })
    }

    fn sorted_files(&self, pattern: &Regex) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(captures) = pattern.captures(name) {
                let batch: u64 = captures[1].parse().unwrap_or(u64::MAX);
                files.push((batch, entry.path()));
            }
        }
        files.sort_unstable_by_key(|(batch, _)| *batch);
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let temp_path = path.with_extension("bin.tmp");
    let writer = BufWriter::new(File::create(&temp_path)?);
    bincode::serialize_into(writer, value)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Lazy record stream across batch files
struct BatchStream<T> {
    files: std::vec::IntoIter<PathBuf>,
    current: std::vec::IntoIter<T>,
}

impl<T: serde::de::DeserializeOwned> Iterator for BatchStream<T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(Ok(item));
            }

            let path = self.files.next()?;
            let items: Vec<T> = match File::open(&path).map_err(StoreError::from).and_then(|file| {
                bincode::deserialize_from(BufReader::new(file)).map_err(StoreError::from)
            }) {
                Ok(items) => items,
                Err(error) => return Some(Err(error)),
            };
            self.current = items.into_iter();
        }
    }
}
