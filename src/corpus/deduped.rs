// * Deduped Corpus Stream
// * Merge-skips the corpus against the sorted duplicate offsets so
// * downstream consumers see only the surviving documents.

use crate::corpus::reader::{CorpusError, CorpusReader, DocumentIter};
use crate::persistence::duplicates_store::DuplicatesStore;
use crate::persistence::minhash_store::StoreError;
use thiserror::Error;

// * Unified Error type for deduped streaming
#[derive(Error, Debug)]
pub enum DedupedStreamError {
    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Duplicates error: {0}")]
    Duplicates(#[from] StoreError),
}

/// Streams the corpus with all flagged duplicates removed
///
/// Duplicate offsets come from the offset-only batch variant, which exists
/// precisely for consumers that do not need the witness sets.
pub fn deduped_documents(
    corpus: &CorpusReader,
    duplicates: &DuplicatesStore,
) -> Result<DedupedIter, DedupedStreamError> {
    let mut offsets = duplicates.iter_offsets()?;
    let next_duplicate = offsets.next().transpose()?;
    Ok(DedupedIter {
        documents: corpus.documents(0)?,
        duplicate_offsets: Box::new(offsets),
        next_duplicate,
        skipped: 0,
    })
}

/// Lazy merge-skip iterator over `(offset, text)`
pub struct DedupedIter {
    documents: DocumentIter,
    duplicate_offsets: Box<dyn Iterator<Item = Result<u64, StoreError>> + Send>,
    next_duplicate: Option<u64>,
    skipped: u64,
}

impl DedupedIter {
    /// Documents skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Iterator for DedupedIter {
    type Item = Result<(u64, String), DedupedStreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (offset, text) = match self.documents.next()? {
                Ok(document) => document,
                Err(error) => return Some(Err(error.into())),
            };

            if self.next_duplicate == Some(offset) {
                self.skipped += 1;
                self.next_duplicate = match self.duplicate_offsets.next().transpose() {
                    Ok(next) => next,
                    Err(error) => return Some(Err(error.into())),
                };
                continue;
            }

            return Some(Ok((offset, text)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::duplicates_store::DuplicateRecord;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    fn write_corpus_file(dir: &Path, name: &str, texts: &[&str]) {
        let mut file = File::create(dir.join(name)).unwrap();
        for text in texts {
            serde_json::to_writer(&mut file, &serde_json::json!({ "text": text })).unwrap();
            writeln!(file).unwrap();
        }
    }

    #[test]
    fn test_duplicates_are_skipped() {
        let corpus_dir = tempfile::tempdir().unwrap();
        let duplicates_dir = tempfile::tempdir().unwrap();
        write_corpus_file(corpus_dir.path(), "00.jsonl", &["a", "b", "c", "d", "e"]);

        let duplicates = DuplicatesStore::open(duplicates_dir.path()).unwrap();
        duplicates
            .save_batch(
                0,
                &[
                    DuplicateRecord {
                        offset: 1,
                        matches: vec![0],
                    },
                    DuplicateRecord {
                        offset: 3,
                        matches: vec![0, 1],
                    },
                ],
            )
            .unwrap();

        let corpus = CorpusReader::open(corpus_dir.path()).unwrap();
        let mut stream = deduped_documents(&corpus, &duplicates).unwrap();
        let kept: Vec<(u64, String)> = stream.by_ref().collect::<Result<_, _>>().unwrap();

        assert_eq!(
            kept,
            vec![
                (0, "a".to_string()),
                (2, "c".to_string()),
                (4, "e".to_string()),
            ]
        );
        assert_eq!(stream.skipped(), 2);
    }

    #[test]
    fn test_no_duplicates_yields_everything() {
        let corpus_dir = tempfile::tempdir().unwrap();
        let duplicates_dir = tempfile::tempdir().unwrap();
        write_corpus_file(corpus_dir.path(), "00.jsonl", &["a", "b"]);

        let duplicates = DuplicatesStore::open(duplicates_dir.path()).unwrap();
        let corpus = CorpusReader::open(corpus_dir.path()).unwrap();
        let kept: Vec<(u64, String)> = deduped_documents(&corpus, &duplicates)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(kept.len(), 2);
    }
}
