// * Corpus Reader
// * Streams documents from a directory of line-delimited JSON files in
// * sorted filename order, yielding dense global offsets. Corpus statistics
// * are computed once and cached as a JSON artifact for fast skip-ahead.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const STATISTICS_FILE: &str = "corpus_statistics.json";

// * Unified Error type for corpus access
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Corpus directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Corpus I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed document at {file}:{line}: {message}")]
    MalformedDocument {
        file: String,
        line: usize,
        message: String,
    },
}

/// One corpus line: a JSON object holding the document text
#[derive(Debug, Serialize, Deserialize)]
struct DocumentLine {
    text: String,
}

/// Cached corpus-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    #[serde(rename = "Data")]
    pub data: String,

    #[serde(rename = "Document Count")]
    pub document_count: u64,

    #[serde(rename = "Total Characters")]
    pub total_characters: u64,

    #[serde(rename = "File Start Offsets")]
    pub file_start_offsets: Vec<u64>,
}

/// Read-only handle to a corpus directory of `*.jsonl` files
#[derive(Debug, Clone)]
pub struct CorpusReader {
    directory: PathBuf,
}

impl CorpusReader {
    /// Opens a corpus directory, failing fast when it does not exist
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(CorpusError::MissingDirectory(directory));
        }
        Ok(Self { directory })
    }

    /// Corpus files in sorted filename order
    pub fn corpus_files(&self) -> Result<Vec<PathBuf>, CorpusError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
        files.sort_unstable();
        Ok(files)
    }

    /// Returns corpus statistics, computing and caching them on first use
    pub fn statistics(&self) -> Result<CorpusStatistics, CorpusError> {
        let path = self.directory.join(STATISTICS_FILE);
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            return serde_json::from_reader(reader).map_err(|error| {
                CorpusError::MalformedDocument {
                    file: path.display().to_string(),
                    line: 0,
                    message: error.to_string(),
                }
            });
        }

        info!("Corpus statistics missing, calculating");
        let statistics = self.compute_statistics()?;

        let temp_path = path.with_extension("json.tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(writer, &statistics)
            .map_err(|error| CorpusError::Io(error.into()))?;
        fs::rename(&temp_path, &path)?;

        Ok(statistics)
    }

    fn compute_statistics(&self) -> Result<CorpusStatistics, CorpusError> {
        let mut document_count = 0u64;
        let mut total_characters = 0u64;
        let mut file_start_offsets = Vec::new();

        for path in self.corpus_files()? {
            file_start_offsets.push(document_count);
            let file_name = path.display().to_string();
            for (line_number, line) in BufReader::new(File::open(&path)?).lines().enumerate() {
                let document = parse_line(&line?, &file_name, line_number)?;
                document_count += 1;
                total_characters += document.text.chars().count() as u64;
            }
        }

        Ok(CorpusStatistics {
            data: "Corpus statistics".to_string(),
            document_count,
            total_characters,
            file_start_offsets,
        })
    }

    /// Streams `(offset, text)` from `start_offset` onward
    ///
    /// Whole files before the checkpointed offset are skipped using the
    /// cached per-file start offsets.
    pub fn documents(&self, start_offset: u64) -> Result<DocumentIter, CorpusError> {
        let files = self.corpus_files()?;

        let mut first_file = 0;
        let mut base_offset = 0;
        if start_offset > 0 {
            let statistics = self.statistics()?;
            for (index, &file_start) in statistics.file_start_offsets.iter().enumerate() {
                if file_start > start_offset {
                    break;
                }
                first_file = index;
                base_offset = file_start;
            }
        }

        Ok(DocumentIter {
            files: files.into_iter().skip(first_file).collect(),
            file_index: 0,
            lines: None,
            current_file: String::new(),
            line_number: 0,
            offset: base_offset,
            start_offset,
        })
    }
}

fn parse_line(line: &str, file: &str, line_number: usize) -> Result<DocumentLine, CorpusError> {
    serde_json::from_str(line).map_err(|error| CorpusError::MalformedDocument {
        file: file.to_string(),
        line: line_number + 1,
        message: error.to_string(),
    })
}

/// Lazy, single-pass, offset-ordered document stream
pub struct DocumentIter {
    files: Vec<PathBuf>,
    file_index: usize,
    lines: Option<Lines<BufReader<File>>>,
    current_file: String,
    line_number: usize,
    offset: u64,
    start_offset: u64,
}

impl Iterator for DocumentIter {
    type Item = Result<(u64, String), CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(lines) = self.lines.as_mut() {
                match lines.next() {
                    Some(Ok(line)) => {
                        self.line_number += 1;
                        let offset = self.offset;
                        self.offset += 1;
                        if offset < self.start_offset {
                            continue;
                        }
                        return match parse_line(&line, &self.current_file, self.line_number - 1) {
                            Ok(document) => Some(Ok((offset, document.text))),
                            Err(error) => Some(Err(error)),
                        };
                    }
                    Some(Err(error)) => return Some(Err(error.into())),
                    None => self.lines = None,
                }
            }

            if self.lines.is_none() {
                let path = self.files.get(self.file_index)?.clone();
                self.file_index += 1;
                self.current_file = path.display().to_string();
                self.line_number = 0;
                info!(file = %self.current_file, "Reading from corpus file");
                match File::open(path) {
                    Ok(file) => self.lines = Some(BufReader::new(file).lines()),
                    Err(error) => return Some(Err(error.into())),
                }
            }
        }
    }
}
