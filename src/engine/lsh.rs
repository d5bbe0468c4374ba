// * Banded LSH Index
// * Maps band hashes of MinHash signatures to offset buckets. Bands and rows
// * are planned from the match threshold by minimizing the classic weighted
// * false-positive/false-negative error integral.

use crate::engine::minhash::Signature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

// * Step width for the numerical error integrals
const INTEGRATION_PRECISION: f64 = 0.001;

// * Unified Error type for index persistence
#[derive(Error, Debug)]
pub enum LshError {
    #[error("Index I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Band layout for a given threshold and permutation count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandPlan {
    pub bands: usize,
    pub rows: usize,
}

/// Picks (bands, rows) with bands * rows == num_permutations minimizing the
/// equally weighted sum of false-positive and false-negative integrals
pub fn plan_bands(threshold: f64, num_permutations: usize) -> BandPlan {
    let mut best = BandPlan {
        bands: 1,
        rows: num_permutations,
    };
    let mut best_error = f64::MAX;

    for bands in 1..=num_permutations {
        if num_permutations % bands != 0 {
            continue;
        }
        let rows = num_permutations / bands;

        let false_positives = integrate(
            |s| 1.0 - (1.0 - s.powi(rows as i32)).powi(bands as i32),
            0.0,
            threshold,
        );
        let false_negatives = integrate(
            |s| (1.0 - s.powi(rows as i32)).powi(bands as i32),
            threshold,
            1.0,
        );

        let error = 0.5 * false_positives + 0.5 * false_negatives;
        if error < best_error {
            best_error = error;
            best = BandPlan { bands, rows };
        }
    }

    best
}

/// Midpoint-rule integration over [start, end]
fn integrate(f: impl Fn(f64) -> f64, start: f64, end: f64) -> f64 {
    let mut area = 0.0;
    let mut x = start;
    while x < end {
        area += f(x + 0.5 * INTEGRATION_PRECISION) * INTEGRATION_PRECISION;
        x += INTEGRATION_PRECISION;
    }
    area
}

/// LSH index over document offsets
///
/// One bucket map per band. Buckets hold compact growable offset lists and
/// are dropped as soon as they empty, so removed offsets are fully
/// unreachable and memory is reclaimed during the dedupe pass.
#[derive(Debug, Serialize, Deserialize)]
pub struct LshIndex {
    threshold: f64,
    num_bands: usize,
    rows_per_band: usize,
    bands: Vec<HashMap<u64, Vec<u64>>>,
}

impl LshIndex {
    /// Creates an empty index for the given threshold and permutation count
    pub fn new(threshold: f64, num_permutations: usize) -> Self {
        let plan = plan_bands(threshold, num_permutations);
        Self {
            threshold,
            num_bands: plan.bands,
            rows_per_band: plan.rows,
            bands: (0..plan.bands).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn rows_per_band(&self) -> usize {
        self.rows_per_band
    }

    /// Adds an offset under every band hash of its signature
    pub fn insert(&mut self, offset: u64, signature: &Signature) {
        for band_index in 0..self.num_bands {
            let hash = self.band_hash(signature, band_index);
            self.bands[band_index].entry(hash).or_default().push(offset);
        }
    }

    /// Returns all offsets colliding with the signature in at least one band
    ///
    /// The result is sorted and deduplicated; the caller's own offset is not
    /// treated specially.
    pub fn query(&self, signature: &Signature) -> Vec<u64> {
        let mut hits = Vec::new();
        for band_index in 0..self.num_bands {
            let hash = self.band_hash(signature, band_index);
            if let Some(bucket) = self.bands[band_index].get(&hash) {
                hits.extend_from_slice(bucket);
            }
        }
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// Removes an offset from every bucket reachable from its signature
    ///
    /// Emptied buckets are pruned so membership queries report absence.
    pub fn remove(&mut self, offset: u64, signature: &Signature) {
        for band_index in 0..self.num_bands {
            let hash = self.band_hash(signature, band_index);
            if let Some(bucket) = self.bands[band_index].get_mut(&hash) {
                bucket.retain(|&candidate| candidate != offset);
                if bucket.is_empty() {
                    self.bands[band_index].remove(&hash);
                }
            }
        }
    }

    /// Total bucket count across bands
    pub fn bucket_count(&self) -> usize {
        self.bands.iter().map(HashMap::len).sum()
    }

    /// Hashes one band's row tuple as little-endian packed bytes
    fn band_hash(&self, signature: &Signature, band_index: usize) -> u64 {
        let start = band_index * self.rows_per_band;
        let end = (start + self.rows_per_band).min(signature.values.len());

        let mut packed = Vec::with_capacity(self.rows_per_band * 8);
        for value in &signature.values[start..end] {
            packed.extend_from_slice(&value.to_le_bytes());
        }
        xxh64(&packed, 0)
    }

    /// Serializes the index to a sidecar file, temp-then-rename
    pub fn save(&self, path: &Path) -> Result<(), LshError> {
        let temp_path = path.with_extension("tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        bincode::serialize_into(writer, self)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Loads a previously saved index
    pub fn load(path: &Path) -> Result<Self, LshError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
