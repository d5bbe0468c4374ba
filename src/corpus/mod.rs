pub mod deduped;
pub mod reader;

// * Re-exports for convenient access
pub use deduped::{deduped_documents, DedupedIter, DedupedStreamError};
pub use reader::{CorpusError, CorpusReader, CorpusStatistics, DocumentIter};
