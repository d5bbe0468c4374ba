// * Shingle Extraction
// * Turns a document into the set of 5-word shingles used for Jaccard
// * similarity. Oversized documents are sliced before tokenization to bound
// * per-document memory.

use crate::config::constants::{DOCUMENT_SLICE_BYTES, SHINGLE_SIZE};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Word-gram shingler with Unicode-aware tokenization
#[derive(Debug, Clone)]
pub struct Shingler {
    shingle_size: usize,
    slice_bytes: usize,
}

impl Shingler {
    /// Creates a shingler with the pipeline defaults (5-grams, 1 MiB slices)
    pub fn new() -> Self {
        Self {
            shingle_size: SHINGLE_SIZE,
            slice_bytes: DOCUMENT_SLICE_BYTES,
        }
    }

    /// Creates a shingler with custom gram width and slice size
    pub fn with_config(shingle_size: usize, slice_bytes: usize) -> Self {
        Self {
            shingle_size,
            slice_bytes,
        }
    }

    /// Computes the shingle set for a document
    ///
    /// Documents larger than the slice size are cut into slices first and
    /// the per-slice shingles are unioned. Shingles never cross a slice
    /// boundary. Duplicate shingles within a document collapse.
    pub fn shingle_set(&self, text: &str) -> HashSet<Vec<u8>> {
        let mut shingles = HashSet::new();
        for slice in self.slices(text) {
            self.shingle_slice(slice, &mut shingles);
        }
        shingles
    }

    /// Cuts a document into slices of at most `slice_bytes` bytes
    ///
    /// Slice ends are snapped back to char boundaries so every slice is
    /// valid UTF-8.
    fn slices<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.len() <= self.slice_bytes {
            return vec![text];
        }

        let mut slices = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let mut end = (start + self.slice_bytes).min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            slices.push(&text[start..end]);
            start = end;
        }
        slices
    }

    /// Emits all word n-grams of one slice into the shingle set
    fn shingle_slice(&self, slice: &str, shingles: &mut HashSet<Vec<u8>>) {
        let tokens = tokenize(slice);
        if tokens.len() < self.shingle_size {
            return;
        }

        for window in tokens.windows(self.shingle_size) {
            shingles.insert(window.join(" ").into_bytes());
        }
    }
}

impl Default for Shingler {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits text into word tokens using Unicode word boundaries
///
/// Letters, digits and punctuation come out as separate tokens; whitespace
/// runs are dropped.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_word_bounds()
        .filter(|token| !token.chars().all(char::is_whitespace))
        .collect()
}
