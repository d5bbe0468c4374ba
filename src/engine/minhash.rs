// * MinHash Signature Builder
// * Fixed-width signatures over shingle sets using a family of affine
// * permutations (a*h + b mod M). Coefficients derive from a fixed public
// * seed so signatures reproduce bit-for-bit across runs and machines.

use crate::config::constants::NUM_PERMUTATIONS;
use crate::engine::shingler::Shingler;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use xxhash_rust::xxh64::xxh64;

// * Modulus for the permutation family, the Mersenne prime 2^61 - 1
pub const MERSENNE_PRIME: u64 = (1 << 61) - 1;

// * Signature entry for documents with no shingles
pub const EMPTY_SIGNATURE_VALUE: u64 = MERSENNE_PRIME - 1;

// * Seed for the coefficient stream. Changing this invalidates every
// * persisted signature.
const PERMUTATION_SEED: u64 = 1;

/// MinHash signature for a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<u64>,
}

impl Signature {
    /// Number of permutation entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every entry is the empty-document sentinel
    pub fn is_sentinel(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|&v| v == EMPTY_SIGNATURE_VALUE)
    }

    /// Estimates Jaccard similarity as the fraction of matching positions
    pub fn estimate_jaccard(&self, other: &Signature) -> f64 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return 0.0;
        }

        let matches = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();

        matches as f64 / self.values.len() as f64
    }
}

/// Builds signatures from document text
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    shingler: Shingler,
    coefficients: Vec<(u64, u64)>,
}

impl SignatureBuilder {
    /// Creates a builder with the pipeline default permutation count
    pub fn new() -> Self {
        Self::with_permutations(NUM_PERMUTATIONS)
    }

    /// Creates a builder with a custom permutation count
    pub fn with_permutations(num_permutations: usize) -> Self {
        Self {
            shingler: Shingler::new(),
            coefficients: permutation_coefficients(num_permutations),
        }
    }

    /// Number of permutations per signature
    pub fn num_permutations(&self) -> usize {
        self.coefficients.len()
    }

    /// Computes the signature for a document
    pub fn build(&self, text: &str) -> Signature {
        self.build_from_shingles(&self.shingler.shingle_set(text))
    }

    /// Computes the signature for an already-extracted shingle set
    pub fn build_from_shingles(&self, shingles: &HashSet<Vec<u8>>) -> Signature {
        if shingles.is_empty() {
            return self.sentinel();
        }

        let mut values = vec![u64::MAX; self.coefficients.len()];
        for shingle in shingles {
            let base = xxh64(shingle, 0);
            for (value, &(a, b)) in values.iter_mut().zip(self.coefficients.iter()) {
                let permuted =
                    ((a as u128 * base as u128 + b as u128) % MERSENNE_PRIME as u128) as u64;
                if permuted < *value {
                    *value = permuted;
                }
            }
        }

        Signature { values }
    }

    /// Signature emitted for empty or failed documents
    pub fn sentinel(&self) -> Signature {
        Signature {
            values: vec![EMPTY_SIGNATURE_VALUE; self.coefficients.len()],
        }
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives the (a, b) permutation pairs from the fixed seed
///
/// a is drawn from [1, M-1], b from [0, M-1], via a SplitMix64 stream.
fn permutation_coefficients(num_permutations: usize) -> Vec<(u64, u64)> {
    let mut state = PERMUTATION_SEED;
    (0..num_permutations)
        .map(|_| {
            let a = 1 + splitmix64(&mut state) % (MERSENNE_PRIME - 1);
            let b = splitmix64(&mut state) % MERSENNE_PRIME;
            (a, b)
        })
        .collect()
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
