// * Persistence Layer
// * Durable artifacts of the pipeline: minhash batch files with their
// * checkpoint transaction machinery, and the duplicates output log.

pub mod duplicates_store;
pub mod minhash_store;

// * Re-exports for convenient access
pub use duplicates_store::{DuplicateRecord, DuplicateStatistics, DuplicatesStore};
pub use minhash_store::{MinhashIter, MinhashRecord, MinhashStore, StoreError};
