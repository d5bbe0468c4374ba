// * Pipeline Orchestrator
// * Three subcommands covering the full dedupe lifecycle: generate minhash
// * signatures, dedupe against the LSH, and stream the surviving corpus.

use clap::{Parser, Subcommand};
use corpus_dedupe::config::constants::{DEFAULT_LSH_THRESHOLD, DEFAULT_WORKER_COUNT};
use corpus_dedupe::corpus::{deduped_documents, CorpusReader};
use corpus_dedupe::engine::dedupe::{run_dedupe, DedupeConfig};
use corpus_dedupe::engine::generator::{generate_minhashes, GeneratorConfig};
use corpus_dedupe::persistence::{DuplicatesStore, MinhashStore};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Parser)]
#[command(name = "corpus-dedupe", about = "Near-duplicate detection for large text corpora")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate minhash signatures for every corpus document
    GenerateMinhashes {
        /// Directory holding the corpus *.jsonl files
        #[arg(long, alias = "corpus_directory", default_value = "pile")]
        corpus_directory: PathBuf,

        /// Where signature batches and the checkpoint live
        #[arg(long, alias = "working_directory", default_value = "generated_minhashes")]
        working_directory: PathBuf,

        /// Number of signature workers
        #[arg(long, alias = "process_count", default_value_t = DEFAULT_WORKER_COUNT)]
        process_count: usize,

        /// Mirror the working directory here after each batch
        #[arg(long, alias = "backup_dir")]
        backup_dir: Option<PathBuf>,
    },

    /// Find near-duplicates using an LSH over the generated minhashes
    Dedupe {
        /// Directory holding the generated minhash batches
        #[arg(long, alias = "minhashes_directory", default_value = "generated_minhashes")]
        minhashes_directory: PathBuf,

        /// Output directory for duplicate batches and statistics
        #[arg(long, alias = "duplicates_directory", default_value = "pile_duplicates")]
        duplicates_directory: PathBuf,

        /// Match threshold, higher means LESS deduplication
        #[arg(long, alias = "lsh_threshold", default_value_t = DEFAULT_LSH_THRESHOLD)]
        lsh_threshold: f64,
    },

    /// Stream the corpus with all flagged duplicates removed
    YieldDeduped {
        /// Directory holding the duplicate batches
        #[arg(long, alias = "duplicates_directory", default_value = "pile_duplicates")]
        duplicates_directory: PathBuf,

        /// Directory holding the corpus *.jsonl files
        #[arg(long, alias = "pile_directory", default_value = "pile")]
        pile_directory: PathBuf,
    },
}

// * Unified Error type for the process boundary
#[derive(Error, Debug)]
enum PipelineError {
    #[error(transparent)]
    Corpus(#[from] corpus_dedupe::corpus::CorpusError),

    #[error(transparent)]
    Store(#[from] corpus_dedupe::persistence::StoreError),

    #[error(transparent)]
    Generate(#[from] corpus_dedupe::engine::generator::GenerateError),

    #[error(transparent)]
    Dedupe(#[from] corpus_dedupe::engine::dedupe::DedupeError),

    #[error(transparent)]
    DedupedStream(#[from] corpus_dedupe::corpus::DedupedStreamError),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("corpus_dedupe=debug,info")
        .with_target(false)
        .json()
        .init();

    if let Err(error) = run(Cli::parse()).await {
        tracing::error!(error = %error, "Pipeline failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    match cli.command {
        Command::GenerateMinhashes {
            corpus_directory,
            working_directory,
            process_count,
            backup_dir,
        } => {
            let corpus = CorpusReader::open(corpus_directory)?;
            let store = MinhashStore::open(working_directory)?;
            let statistics = corpus.statistics()?;
            info!(
                document_count = statistics.document_count,
                "Total documents in dataset"
            );

            let config = GeneratorConfig {
                worker_count: process_count,
                backup_dir,
                ..GeneratorConfig::default()
            };
            generate_minhashes(&corpus, &store, config).await?;
        }

        Command::Dedupe {
            minhashes_directory,
            duplicates_directory,
            lsh_threshold,
        } => {
            let config = DedupeConfig {
                lsh_threshold,
                ..DedupeConfig::default()
            };
            run_dedupe(&minhashes_directory, &duplicates_directory, config)?;
        }

        Command::YieldDeduped {
            duplicates_directory,
            pile_directory,
        } => {
            let duplicates = DuplicatesStore::open(duplicates_directory)?;
            let corpus = CorpusReader::open(pile_directory)?;

            let corpus_statistics = corpus.statistics()?;
            if let Some(statistics) = duplicates.statistics()? {
                let remaining = corpus_statistics
                    .document_count
                    .saturating_sub(statistics.total_duplicates);
                let percent_remaining =
                    remaining as f64 / corpus_statistics.document_count.max(1) as f64 * 100.0;
                info!(
                    lsh_threshold = statistics.lsh_threshold,
                    total_duplicates = statistics.total_duplicates,
                    percent_remaining,
                    "Duplicate statistics"
                );
            }

            let mut stream = deduped_documents(&corpus, &duplicates)?;
            let mut yielded = 0u64;
            for document in stream.by_ref() {
                document?;
                yielded += 1;
            }
            info!(
                yielded,
                skipped = stream.skipped(),
                "Total yielded documents"
            );
        }
    }

    Ok(())
}
