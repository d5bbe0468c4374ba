// * Configuration Constants
// * Central location for pipeline-wide sizes, defaults and thresholds

// * Number of MinHash permutations per signature
pub const NUM_PERMUTATIONS: usize = 10;

// * Word-gram width used for shingling
pub const SHINGLE_SIZE: usize = 5;

// * Documents per committed minhash batch file
pub const MINHASH_BATCH_SIZE: usize = 100_000;

// * Duplicate records per output batch file
pub const DUPLICATE_SAVE_FREQUENCY: usize = 1_000_000;

// * Maximum slice length when shingling oversized documents
pub const DOCUMENT_SLICE_BYTES: usize = 1024 * 1024;

// * Default LSH match threshold, higher means LESS deduplication
pub const DEFAULT_LSH_THRESHOLD: f64 = 0.5;

// * Default number of signature workers for the generation phase
pub const DEFAULT_WORKER_COUNT: usize = 4;

// * Minimum fraction of the output volume that must remain free before
// * a duplicates batch is flushed
pub const MIN_FREE_SPACE_RATIO: f64 = 0.05;
