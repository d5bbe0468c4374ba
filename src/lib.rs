// * Corpus near-duplicate detection pipeline
// * Minhash generation, banded LSH indexing and a streaming dedupe pass
// * over very large document corpora, with crash-safe batch checkpointing.

pub mod config;
pub mod corpus;
pub mod engine;
pub mod persistence;
